//! Derived topic state: the aggregated embedding and the category set.
//!
//! A topic's aggregate is the elementwise mean of its own embedding and the
//! embeddings of its most recent linked points, plus the lowercase-deduplicated
//! union of their categories. It is recomputed synchronously after every change
//! to the topic's links. When that best-effort recompute fails, the topic stays
//! marked dirty and [`reconcile_stale_aggregates`] picks it up later.

use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{GraphError, Result};
use crate::graph::store::{self, write_audit_log, TOPIC_COLUMNS};
use crate::graph::types::{now_timestamp, EntityType, PrayerPoint, PrayerTopic};
use crate::graph::{embedding_to_bytes, vector};

/// How many of the most recent linked points feed a topic aggregate.
pub const DEFAULT_RECENT_POINT_LIMIT: usize = 30;

/// Result of aggregating one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub topic_id: String,
    /// `None` when no source had an embedding. Never an empty vector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub categories: Vec<String>,
    /// Number of embeddings that were averaged.
    pub source_count: usize,
    /// Number of linked points considered.
    pub point_count: usize,
}

/// Pure aggregation over an already-loaded topic and its linked points
/// (newest first).
pub fn compute_aggregate(topic: &PrayerTopic, points: &[PrayerPoint]) -> AggregateResult {
    let own = topic.embedding.as_deref().filter(|e| !e.is_empty());
    let linked: Vec<&[f32]> = points
        .iter()
        .filter_map(|p| p.embedding.as_deref())
        .filter(|e| !e.is_empty())
        .collect();

    // Points are listed before the topic so they win a tie.
    let dims = dominant_dimension(linked.iter().copied().chain(own));
    let sources: Vec<&[f32]> = own
        .into_iter()
        .chain(linked.iter().copied())
        .filter(|s| Some(s.len()) == dims)
        .collect();

    let ignored = usize::from(own.is_some()) + linked.len() - sources.len();
    if ignored > 0 {
        tracing::warn!(
            topic_id = %topic.id,
            ignored,
            dims = dims.unwrap_or_default(),
            "ignoring embeddings with a different dimension"
        );
    }

    let averaged = vector::average_vectors(&sources);

    AggregateResult {
        topic_id: topic.id.clone(),
        embedding: (!averaged.is_empty()).then_some(averaged),
        categories: dedupe_categories(points.iter().filter_map(|p| p.category.as_deref())),
        source_count: sources.len(),
        point_count: points.len(),
    }
}

/// The vector length shared by the most sources. On a tie the length seen
/// first wins.
fn dominant_dimension<'a>(sources: impl Iterator<Item = &'a [f32]>) -> Option<usize> {
    let mut counts: Vec<(usize, usize)> = Vec::new();
    for source in sources {
        match counts.iter_mut().find(|(dim, _)| *dim == source.len()) {
            Some((_, n)) => *n += 1,
            None => counts.push((source.len(), 1)),
        }
    }
    counts
        .into_iter()
        .fold(None, |best: Option<(usize, usize)>, (dim, n)| match best {
            Some((_, most)) if most >= n => best,
            _ => Some((dim, n)),
        })
        .map(|(dim, _)| dim)
}

/// Lowercase, trim, drop empties, and deduplicate, keeping first-seen order.
pub fn dedupe_categories<'a>(categories: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    categories
        .into_iter()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

/// Load, compute, and write back a topic's aggregate on the given connection
/// (usually a transaction or savepoint owned by the caller).
pub(crate) fn aggregate_topic(
    conn: &Connection,
    topic_id: &str,
    limit: usize,
) -> Result<AggregateResult> {
    let topic = store::require_topic(conn, topic_id)?;
    let points = store::linked_points(conn, topic_id, limit)?;
    let result = compute_aggregate(&topic, &points);

    // An absent aggregate is written as NULL so no stale vector survives.
    let embedding = result.embedding.as_deref().map(embedding_to_bytes);
    let categories = serde_json::to_string(&result.categories)?;
    conn.execute(
        "UPDATE prayer_topics SET aggregated_embedding = ?1, categories = ?2, \
         aggregated_at = ?3, aggregate_dirty = 0 WHERE id = ?4",
        params![embedding, categories, now_timestamp(), topic_id],
    )?;

    write_audit_log(
        conn,
        "aggregate",
        EntityType::Topic,
        topic_id,
        Some(&serde_json::json!({
            "sources": result.source_count,
            "points": result.point_count,
            "categories": result.categories,
        })),
    )?;

    tracing::debug!(
        topic_id = %topic_id,
        sources = result.source_count,
        has_embedding = result.embedding.is_some(),
        "topic aggregate written"
    );
    Ok(result)
}

/// Best-effort aggregation inside a savepoint of a link transaction.
///
/// On failure only the savepoint is rolled back: the link writes stay, the topic
/// stays dirty, and the error is logged.
pub(crate) fn aggregate_in_savepoint(
    tx: &mut Transaction<'_>,
    topic_id: &str,
    limit: usize,
) -> Option<AggregateResult> {
    let outcome: Result<AggregateResult> = (|| {
        let sp = tx.savepoint()?;
        let result = aggregate_topic(&sp, topic_id, limit)?;
        sp.commit()?;
        Ok(result)
    })();

    match outcome {
        Ok(result) => Some(result),
        Err(e) => {
            tracing::warn!(topic_id = %topic_id, error = %e, "aggregation failed, topic left dirty");
            None
        }
    }
}

/// Recompute one topic's aggregate in its own transaction.
///
/// Idempotent: with no intervening link change, repeated calls write
/// bit-identical embeddings and categories.
pub fn recompute_topic_aggregate(
    conn: &mut Connection,
    topic_id: &str,
    limit: usize,
) -> Result<AggregateResult> {
    if topic_id.trim().is_empty() {
        return Err(GraphError::invalid("topic id is required"));
    }

    let tx = conn.transaction()?;
    let result = aggregate_topic(&tx, topic_id, limit).map_err(|e| match e {
        GraphError::NotFound(msg) => GraphError::InvalidArgument(msg),
        other => other,
    })?;
    tx.commit()?;

    tracing::info!(topic_id = %topic_id, sources = result.source_count, "topic aggregate recomputed");
    Ok(result)
}

/// Summary of a reconcile sweep.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub recomputed: usize,
    pub failed: usize,
}

/// Recompute topics that are dirty, never aggregated, or last aggregated before
/// `stale_after` ago. Each topic gets its own transaction; failures are counted
/// and logged, not propagated.
pub fn reconcile_stale_aggregates(
    conn: &mut Connection,
    stale_after: chrono::Duration,
    max_topics: usize,
    point_limit: usize,
) -> Result<ReconcileReport> {
    let cutoff = (chrono::Utc::now() - stale_after)
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);

    let stale_ids: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT id FROM prayer_topics \
             WHERE aggregate_dirty = 1 OR aggregated_at IS NULL OR aggregated_at < ?1 \
             ORDER BY aggregated_at ASC NULLS FIRST, id LIMIT ?2",
        )?;
        let ids = stmt
            .query_map(params![cutoff, max_topics as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        ids
    };

    let mut report = ReconcileReport {
        examined: stale_ids.len(),
        ..Default::default()
    };

    for topic_id in &stale_ids {
        match recompute_topic_aggregate(conn, topic_id, point_limit) {
            Ok(_) => report.recomputed += 1,
            Err(e) => {
                report.failed += 1;
                tracing::warn!(topic_id = %topic_id, error = %e, "reconcile failed for topic");
            }
        }
    }

    if report.examined > 0 {
        tracing::info!(
            examined = report.examined,
            recomputed = report.recomputed,
            failed = report.failed,
            "aggregate reconcile sweep finished"
        );
    }
    Ok(report)
}

/// Topics that currently need a reconcile pass, for status reporting.
pub fn dirty_topics(conn: &Connection) -> Result<Vec<PrayerTopic>> {
    let sql = format!(
        "SELECT {TOPIC_COLUMNS} FROM prayer_topics WHERE aggregate_dirty = 1 ORDER BY updated_at"
    );
    store::query_topics(conn, &sql, [])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::store::{create_point, create_topic, union_append, ArrayField, NewPoint, NewTopic};
    use serde_json::json;

    fn test_db() -> Connection {
        crate::db::open_memory_database().unwrap()
    }

    fn insert_point(conn: &mut Connection, id: &str, category: Option<&str>, embedding: Option<Vec<f32>>) {
        create_point(
            conn,
            NewPoint {
                id: Some(id.into()),
                title: id.into(),
                content: "content".into(),
                category: category.map(str::to_string),
                author_id: "u1".into(),
                embedding,
                ..Default::default()
            },
        )
        .unwrap();
    }

    fn insert_topic(conn: &mut Connection, id: &str, embedding: Option<Vec<f32>>) {
        create_topic(
            conn,
            NewTopic {
                id: Some(id.into()),
                title: "Topic".into(),
                author_id: "u1".into(),
                embedding,
                ..Default::default()
            },
            DEFAULT_RECENT_POINT_LIMIT,
        )
        .unwrap();
    }

    fn attach(conn: &Connection, point_id: &str, topic_id: &str) {
        union_append(conn, ArrayField::LinkedTopics, point_id, &[json!(topic_id)]).unwrap();
    }

    #[test]
    fn test_two_orthogonal_points_average() {
        let mut conn = test_db();
        insert_topic(&mut conn, "t1", None);
        insert_point(&mut conn, "a", Some("Health"), Some(vec![1.0, 0.0]));
        insert_point(&mut conn, "b", Some("health "), Some(vec![0.0, 1.0]));
        attach(&conn, "a", "t1");
        attach(&conn, "b", "t1");

        let result = recompute_topic_aggregate(&mut conn, "t1", 30).unwrap();
        assert_eq!(result.embedding, Some(vec![0.5, 0.5]));
        assert_eq!(result.categories, vec!["health"]);
        assert_eq!(result.source_count, 2);

        let topic = store::get_topic(&conn, "t1").unwrap().unwrap();
        assert_eq!(topic.aggregated_embedding, Some(vec![0.5, 0.5]));
        assert_eq!(topic.categories, vec!["health"]);
        assert!(!topic.aggregate_dirty);
    }

    #[test]
    fn test_dimension_tie_goes_to_linked_points() {
        let mut conn = test_db();
        insert_topic(&mut conn, "t1", Some(vec![1.0, 1.0, 1.0]));
        insert_point(&mut conn, "a", None, Some(vec![0.0, 1.0]));
        attach(&conn, "a", "t1");

        let result = recompute_topic_aggregate(&mut conn, "t1", 30).unwrap();
        assert_eq!(result.embedding, Some(vec![0.0, 1.0]));
        assert_eq!(result.source_count, 1);
    }

    #[test]
    fn test_topic_own_embedding_contributes() {
        let mut conn = test_db();
        insert_topic(&mut conn, "t1", Some(vec![3.0, 3.0]));
        insert_point(&mut conn, "a", None, Some(vec![1.0, 1.0]));
        attach(&conn, "a", "t1");

        let result = recompute_topic_aggregate(&mut conn, "t1", 30).unwrap();
        assert_eq!(result.embedding, Some(vec![2.0, 2.0]));
        assert!(result.categories.is_empty());
    }

    #[test]
    fn test_no_sources_leaves_field_absent() {
        let mut conn = test_db();
        insert_topic(&mut conn, "t1", None);
        insert_point(&mut conn, "a", Some("Work"), None);
        attach(&conn, "a", "t1");

        // Simulate a stale aggregate left behind by an earlier state
        conn.execute(
            "UPDATE prayer_topics SET aggregated_embedding = ?1 WHERE id = 't1'",
            params![embedding_to_bytes(&[9.0, 9.0])],
        )
        .unwrap();

        let result = recompute_topic_aggregate(&mut conn, "t1", 30).unwrap();
        assert_eq!(result.embedding, None);
        assert_eq!(result.categories, vec!["work"]);

        let is_null: bool = conn
            .query_row(
                "SELECT aggregated_embedding IS NULL FROM prayer_topics WHERE id = 't1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(is_null, "aggregate must be NULL, never an empty blob");
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let mut conn = test_db();
        insert_topic(&mut conn, "t1", Some(vec![0.1, 0.7, 0.3]));
        insert_point(&mut conn, "a", Some("Family"), Some(vec![0.3, 0.3, 0.9]));
        insert_point(&mut conn, "b", Some("Peace"), Some(vec![0.7, 0.11, 0.13]));
        attach(&conn, "a", "t1");
        attach(&conn, "b", "t1");

        let first = recompute_topic_aggregate(&mut conn, "t1", 30).unwrap();
        let blob_1: Vec<u8> = conn
            .query_row("SELECT aggregated_embedding FROM prayer_topics WHERE id = 't1'", [], |r| r.get(0))
            .unwrap();
        let second = recompute_topic_aggregate(&mut conn, "t1", 30).unwrap();
        let blob_2: Vec<u8> = conn
            .query_row("SELECT aggregated_embedding FROM prayer_topics WHERE id = 't1'", [], |r| r.get(0))
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(blob_1, blob_2);
    }

    #[test]
    fn test_limit_caps_contributing_points() {
        let mut conn = test_db();
        insert_topic(&mut conn, "t1", None);
        for (i, cat) in ["a", "b", "c"].iter().enumerate() {
            let id = format!("p{i}");
            create_point(
                &mut conn,
                NewPoint {
                    id: Some(id.clone()),
                    title: id.clone(),
                    content: "c".into(),
                    category: Some(cat.to_string()),
                    author_id: "u1".into(),
                    created_at: Some(format!("2024-0{}-01T00:00:00Z", i + 1)),
                    ..Default::default()
                },
            )
            .unwrap();
            attach(&conn, &id, "t1");
        }

        let result = recompute_topic_aggregate(&mut conn, "t1", 2).unwrap();
        assert_eq!(result.point_count, 2);
        assert_eq!(result.categories, vec!["c", "b"]);
    }

    #[test]
    fn test_recompute_missing_topic_is_invalid_argument() {
        let mut conn = test_db();
        assert_eq!(
            recompute_topic_aggregate(&mut conn, "nope", 30).unwrap_err().code(),
            "invalid-argument"
        );
        assert_eq!(
            recompute_topic_aggregate(&mut conn, "", 30).unwrap_err().code(),
            "invalid-argument"
        );
    }

    #[test]
    fn test_reconcile_picks_up_dirty_topics() {
        let mut conn = test_db();
        insert_topic(&mut conn, "t1", None);
        insert_topic(&mut conn, "t2", None);
        insert_point(&mut conn, "a", Some("Hope"), Some(vec![1.0, 0.0]));
        attach(&conn, "a", "t1");
        store::mark_topics_dirty(&conn, &["t1".to_string()]).unwrap();

        assert_eq!(dirty_topics(&conn).unwrap().len(), 1);

        let report =
            reconcile_stale_aggregates(&mut conn, chrono::Duration::hours(24), 100, 30).unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.recomputed, 1);
        assert_eq!(report.failed, 0);

        let topic = store::get_topic(&conn, "t1").unwrap().unwrap();
        assert_eq!(topic.aggregated_embedding, Some(vec![1.0, 0.0]));
        assert!(dirty_topics(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_dedupe_categories_keeps_first_seen_order() {
        let cats = dedupe_categories(["Family", " work", "", "family", "WORK", "Peace"]);
        assert_eq!(cats, vec!["family", "work", "peace"]);
    }
}
