//! Nearest-neighbour ranking over embeddings.
//!
//! Ranking is brute-force cosine similarity over a bounded candidate pool that
//! is fetched once per request (and shared across queries in the batch form).

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::{GraphError, Result};
use crate::graph::store::{self, POINT_COLUMNS, TOPIC_COLUMNS};
use crate::graph::types::EntityType;
use crate::graph::vector::cosine_similarity;

/// Hard cap on results per query, regardless of what the caller asks for.
pub const MAX_TOP_K: usize = 10;

/// Longest accepted query vector.
pub const MAX_QUERY_DIMS: usize = 1536;

/// Something that can be ranked.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub entity_type: EntityType,
    pub title: String,
    pub category: Option<String>,
    pub embedding: Vec<f32>,
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarItem {
    pub id: String,
    pub entity_type: EntityType,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub similarity: f32,
}

/// Limits applied to every search.
#[derive(Debug, Clone, Copy)]
pub struct SearchLimits {
    pub max_top_k: usize,
    pub max_query_dims: usize,
    pub candidate_pool: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_top_k: MAX_TOP_K,
            max_query_dims: MAX_QUERY_DIMS,
            candidate_pool: 500,
        }
    }
}

impl From<&crate::config::SearchConfig> for SearchLimits {
    fn from(config: &crate::config::SearchConfig) -> Self {
        Self {
            max_top_k: config.max_top_k.min(MAX_TOP_K),
            max_query_dims: config.max_query_dims.min(MAX_QUERY_DIMS),
            candidate_pool: config.candidate_pool,
        }
    }
}

/// Reject empty, oversized, or non-finite query vectors.
pub fn validate_query(query: &[f32], max_dims: usize) -> Result<()> {
    if query.is_empty() {
        return Err(GraphError::invalid("query embedding must not be empty"));
    }
    if query.len() > max_dims {
        return Err(GraphError::invalid(format!(
            "query embedding has {} dimensions, maximum is {max_dims}",
            query.len()
        )));
    }
    if query.iter().any(|x| !x.is_finite()) {
        return Err(GraphError::invalid("query embedding contains non-finite values"));
    }
    Ok(())
}

/// Clamp a requested result count into `[1, max]`.
pub fn clamp_top_k(requested: usize, max: usize) -> usize {
    requested.clamp(1, max.max(1))
}

/// Rank `candidates` by similarity to `query` and keep the best `k`.
///
/// Candidates without a comparable embedding are skipped. Ties keep the
/// candidates' original order.
pub fn top_k(
    query: &[f32],
    candidates: &[Candidate],
    k: usize,
    exclude_id: Option<&str>,
) -> Vec<SimilarItem> {
    let mut scored: Vec<SimilarItem> = candidates
        .iter()
        .filter(|c| Some(c.id.as_str()) != exclude_id)
        .filter_map(|c| {
            let similarity = cosine_similarity(query, &c.embedding)?;
            Some(SimilarItem {
                id: c.id.clone(),
                entity_type: c.entity_type,
                title: c.title.clone(),
                category: c.category.clone(),
                similarity,
            })
        })
        .collect();

    // sort_by is stable, so equal scores keep fetch order
    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    scored.truncate(k);
    scored
}

/// A single query in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchQuery {
    pub id: String,
    pub embedding: Vec<f32>,
}

/// Rank one shared candidate pool against several queries. Each query excludes
/// its own id from its results.
pub fn top_k_batch(
    queries: &[BatchQuery],
    candidates: &[Candidate],
    k: usize,
) -> BTreeMap<String, Vec<SimilarItem>> {
    queries
        .iter()
        .map(|q| (q.id.clone(), top_k(&q.embedding, candidates, k, Some(&q.id))))
        .collect()
}

/// Request for [`find_similar`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindSimilarRequest {
    pub query_embedding: Vec<f32>,
    pub top_k: usize,
    #[serde(default)]
    pub exclude_id: Option<String>,
    pub owner_id: String,
    /// Which entity kind to search. Topics are ranked by their aggregate.
    #[serde(default = "default_target")]
    pub target: EntityType,
}

/// Request for [`find_similar_batch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindSimilarBatchRequest {
    pub queries: Vec<BatchQuery>,
    pub top_k: usize,
    pub owner_id: String,
    #[serde(default = "default_target")]
    pub target: EntityType,
}

fn default_target() -> EntityType {
    EntityType::Point
}

/// Related prayers for one query embedding, from the owner's own entities.
pub fn find_similar(
    conn: &Connection,
    request: &FindSimilarRequest,
    limits: SearchLimits,
) -> Result<Vec<SimilarItem>> {
    require_owner(&request.owner_id)?;
    validate_query(&request.query_embedding, limits.max_query_dims)?;

    let k = clamp_top_k(request.top_k, limits.max_top_k);
    let pool = fetch_candidates(conn, &request.owner_id, request.target, limits.candidate_pool)?;
    let results = top_k(&request.query_embedding, &pool, k, request.exclude_id.as_deref());

    tracing::debug!(
        owner = %request.owner_id,
        pool = pool.len(),
        returned = results.len(),
        "find_similar"
    );
    Ok(results)
}

/// Related prayers for several queries against one shared pool.
pub fn find_similar_batch(
    conn: &Connection,
    request: &FindSimilarBatchRequest,
    limits: SearchLimits,
) -> Result<BTreeMap<String, Vec<SimilarItem>>> {
    require_owner(&request.owner_id)?;
    let mut seen = HashSet::new();
    for (i, q) in request.queries.iter().enumerate() {
        if q.id.trim().is_empty() {
            return Err(GraphError::invalid(format!("query {i}: id is required")));
        }
        // Results are keyed by query id, so a repeat would be silently dropped.
        if !seen.insert(q.id.as_str()) {
            return Err(GraphError::invalid(format!("query {i}: duplicate id {}", q.id)));
        }
        validate_query(&q.embedding, limits.max_query_dims)
            .map_err(|e| GraphError::invalid(format!("query {}: {e}", q.id)))?;
    }

    let k = clamp_top_k(request.top_k, limits.max_top_k);
    let pool = fetch_candidates(conn, &request.owner_id, request.target, limits.candidate_pool)?;
    Ok(top_k_batch(&request.queries, &pool, k))
}

fn require_owner(owner_id: &str) -> Result<()> {
    if owner_id.trim().is_empty() {
        return Err(GraphError::Unauthenticated(
            "an owner id is required for similarity search".into(),
        ));
    }
    Ok(())
}

/// The owner's entities that carry an embedding, newest first.
pub fn fetch_candidates(
    conn: &Connection,
    owner_id: &str,
    target: EntityType,
    pool_size: usize,
) -> Result<Vec<Candidate>> {
    match target {
        EntityType::Point => {
            let sql = format!(
                "SELECT {POINT_COLUMNS} FROM prayer_points \
                 WHERE author_id = ?1 AND embedding IS NOT NULL \
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            );
            let points = store::query_points(conn, &sql, params![owner_id, pool_size as i64])?;
            Ok(points
                .into_iter()
                .filter_map(|p| {
                    Some(Candidate {
                        embedding: p.embedding?,
                        id: p.id,
                        entity_type: EntityType::Point,
                        title: p.title,
                        category: p.category,
                    })
                })
                .collect())
        }
        EntityType::Topic => {
            let sql = format!(
                "SELECT {TOPIC_COLUMNS} FROM prayer_topics \
                 WHERE author_id = ?1 AND aggregated_embedding IS NOT NULL \
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            );
            let topics = store::query_topics(conn, &sql, params![owner_id, pool_size as i64])?;
            Ok(topics
                .into_iter()
                .filter_map(|t| {
                    Some(Candidate {
                        embedding: t.aggregated_embedding?,
                        id: t.id,
                        entity_type: EntityType::Topic,
                        title: t.title,
                        category: t.categories.into_iter().next(),
                    })
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, embedding: Vec<f32>) -> Candidate {
        Candidate {
            id: id.into(),
            entity_type: EntityType::Point,
            title: format!("title {id}"),
            category: None,
            embedding,
        }
    }

    #[test]
    fn test_ranks_descending() {
        let pool = vec![
            candidate("far", vec![0.0, 1.0]),
            candidate("near", vec![1.0, 0.1]),
            candidate("mid", vec![1.0, 1.0]),
        ];
        let ids: Vec<String> = top_k(&[1.0, 0.0], &pool, 10, None)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
    }

    #[test]
    fn test_ties_keep_fetch_order() {
        let pool = vec![
            candidate("first", vec![2.0, 0.0]),
            candidate("second", vec![1.0, 0.0]),
            candidate("third", vec![5.0, 0.0]),
        ];
        let ids: Vec<String> = top_k(&[1.0, 0.0], &pool, 10, None)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_excludes_self_and_incomparable() {
        let pool = vec![
            candidate("self", vec![1.0, 0.0]),
            candidate("empty", vec![]),
            candidate("zero", vec![0.0, 0.0]),
            candidate("wrong-dims", vec![1.0, 0.0, 0.0]),
            candidate("other", vec![0.5, 0.5]),
        ];
        let results = top_k(&[1.0, 0.0], &pool, 10, Some("self"));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "other");
    }

    #[test]
    fn test_truncates_to_k() {
        let pool: Vec<Candidate> = (0..20)
            .map(|i| candidate(&format!("c{i}"), vec![1.0, i as f32]))
            .collect();
        assert_eq!(top_k(&[1.0, 0.0], &pool, 3, None).len(), 3);
    }

    #[test]
    fn test_clamp_top_k() {
        assert_eq!(clamp_top_k(0, MAX_TOP_K), 1);
        assert_eq!(clamp_top_k(5, MAX_TOP_K), 5);
        assert_eq!(clamp_top_k(500, MAX_TOP_K), MAX_TOP_K);
    }

    #[test]
    fn test_validate_query() {
        assert!(validate_query(&[0.1; 1536], MAX_QUERY_DIMS).is_ok());
        assert_eq!(validate_query(&[], MAX_QUERY_DIMS).unwrap_err().code(), "invalid-argument");
        assert_eq!(
            validate_query(&vec![0.1; 2000], MAX_QUERY_DIMS).unwrap_err().code(),
            "invalid-argument"
        );
        assert!(validate_query(&[f32::NAN], MAX_QUERY_DIMS).is_err());
    }

    #[test]
    fn test_batch_shares_pool() {
        let pool: Vec<Candidate> = (0..5)
            .map(|i| candidate(&format!("c{i}"), vec![1.0, i as f32]))
            .collect();
        let queries = vec![
            BatchQuery { id: "q1".into(), embedding: vec![1.0, 0.0] },
            BatchQuery { id: "c4".into(), embedding: vec![0.0, 1.0] },
        ];
        let results = top_k_batch(&queries, &pool, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results["q1"].len(), 2);
        assert_eq!(results["q1"][0].id, "c0");
        assert!(results["c4"].iter().all(|r| r.id != "c4"));
        assert_eq!(results["c4"][0].id, "c3");
    }
}
