//! Link and unlink points and topics.
//!
//! Every operation runs in one SQLite transaction: the point's `linked_topics`,
//! the topic's `journey`, and the dirty flag move together or not at all. The
//! topic aggregate is then recomputed inside a savepoint of the same
//! transaction, so a failing aggregation never rolls back the link itself.

use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::graph::aggregate::{self, AggregateResult};
use crate::graph::merge::ids_to_values;
use crate::graph::store::{
    self, journey_value, remove_from, union_append, write_audit_log, ArrayField, NewTopic,
};
use crate::graph::types::{EntityType, PrayerPoint};

/// What a point is being linked to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkTarget {
    /// An existing topic.
    Topic { id: String },
    /// Another point; the two are grouped under a newly created topic.
    /// `new_topic_id` makes the creation idempotent on replay.
    Point {
        id: String,
        #[serde(default)]
        new_topic_title: Option<String>,
        #[serde(default)]
        new_topic_id: Option<String>,
    },
}

impl LinkTarget {
    pub fn id(&self) -> &str {
        match self {
            Self::Topic { id } | Self::Point { id, .. } => id,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Topic { .. } => EntityType::Topic,
            Self::Point { .. } => EntityType::Point,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    pub point_id: String,
    pub target: LinkTarget,
}

impl LinkRequest {
    pub fn validate(&self) -> Result<()> {
        if self.point_id.trim().is_empty() {
            return Err(GraphError::invalid("point id is required"));
        }
        if self.target.id().trim().is_empty() {
            return Err(GraphError::invalid(format!(
                "{} id is required",
                self.target.entity_type()
            )));
        }
        if matches!(self.target, LinkTarget::Point { .. }) && self.target.id() == self.point_id {
            return Err(GraphError::invalid("cannot link a point to itself"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResult {
    /// The point named in the request, after the link.
    pub point: PrayerPoint,
    /// Topic ids newly added to the point. Empty when the link already existed.
    pub added_topic_ids: Vec<String>,
    /// Set when the link created a topic (point → point).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_topic_id: Option<String>,
    pub aggregates: Vec<AggregateResult>,
}

/// Request for [`update_point_links`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkUpdateRequest {
    pub point_id: String,
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

impl LinkUpdateRequest {
    pub fn validate(&self) -> Result<()> {
        if self.point_id.trim().is_empty() {
            return Err(GraphError::invalid("point id is required"));
        }
        if self.add.is_empty() && self.remove.is_empty() {
            return Err(GraphError::invalid("nothing to add or remove"));
        }
        if self.add.iter().chain(&self.remove).any(|id| id.trim().is_empty()) {
            return Err(GraphError::invalid("topic ids must not be empty"));
        }
        if let Some(id) = self.add.iter().find(|id| self.remove.contains(id)) {
            return Err(GraphError::invalid(format!(
                "topic {id} cannot be both added and removed"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkUpdateResult {
    pub point: PrayerPoint,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub aggregates: Vec<AggregateResult>,
}

/// Link a point to an existing topic, or to another point through a new topic.
pub fn link_point_to_topic(
    conn: &mut Connection,
    request: &LinkRequest,
    aggregate_limit: usize,
) -> Result<LinkResult> {
    request.validate()?;

    let mut tx = conn.transaction()?;
    let point = store::require_point(&tx, &request.point_id)?;

    let (topic_id, created, also_linked) = match &request.target {
        LinkTarget::Topic { id } => {
            if !store::topic_exists(&tx, id)? {
                return Err(GraphError::not_found(format!("topic not found: {id}")));
            }
            (id.clone(), false, None)
        }
        LinkTarget::Point {
            id,
            new_topic_title,
            new_topic_id,
        } => {
            let other = store::require_point(&tx, id)?;
            let (topic_id, created) =
                ensure_pair_topic(&tx, &point, &other, new_topic_title, new_topic_id)?;
            (topic_id, created, Some(other))
        }
    };

    let added = attach(&tx, &point, &topic_id)?;
    if let Some(other) = &also_linked {
        attach(&tx, other, &topic_id)?;
    }

    let aggregates: Vec<AggregateResult> =
        aggregate::aggregate_in_savepoint(&mut tx, &topic_id, aggregate_limit)
            .into_iter()
            .collect();

    let point = store::require_point(&tx, &request.point_id)?;
    tx.commit()?;

    tracing::info!(
        point_id = %request.point_id,
        topic_id = %topic_id,
        created_topic = created,
        newly_linked = added,
        "point linked"
    );

    Ok(LinkResult {
        point,
        added_topic_ids: if added { vec![topic_id.clone()] } else { vec![] },
        created_topic_id: created.then_some(topic_id),
        aggregates,
    })
}

/// Apply several link additions and removals for one point atomically.
///
/// Unknown points and unknown topics to add are invalid arguments. Removing a
/// topic that no longer exists still cleans the dangling id off the point.
pub fn update_point_links(
    conn: &mut Connection,
    request: &LinkUpdateRequest,
    aggregate_limit: usize,
) -> Result<LinkUpdateResult> {
    request.validate()?;

    let mut tx = conn.transaction()?;
    let point = store::get_point(&tx, &request.point_id)?
        .ok_or_else(|| GraphError::invalid(format!("point not found: {}", request.point_id)))?;

    let mut added = Vec::new();
    let mut touched = Vec::new();
    for topic_id in request.add.iter().map(|s| s.trim()) {
        if !store::topic_exists(&tx, topic_id)? {
            return Err(GraphError::invalid(format!("topic not found: {topic_id}")));
        }
        if attach(&tx, &point, topic_id)? {
            added.push(topic_id.to_string());
        }
        touched.push(topic_id.to_string());
    }

    let mut removed = Vec::new();
    for topic_id in request.remove.iter().map(|s| s.trim()) {
        if detach(&tx, &point.id, topic_id)? {
            removed.push(topic_id.to_string());
        }
        if store::topic_exists(&tx, topic_id)? {
            touched.push(topic_id.to_string());
        }
    }

    let mut seen = std::collections::HashSet::new();
    touched.retain(|id| seen.insert(id.clone()));
    let aggregates = aggregate_each(&mut tx, &touched, aggregate_limit);

    let point = store::require_point(&tx, &request.point_id)?;
    tx.commit()?;

    tracing::info!(
        point_id = %request.point_id,
        added = added.len(),
        removed = removed.len(),
        "point links updated"
    );

    Ok(LinkUpdateResult {
        point,
        added,
        removed,
        aggregates,
    })
}

/// Detach a point from a single topic.
pub fn unlink_point_from_topic(
    conn: &mut Connection,
    point_id: &str,
    topic_id: &str,
    aggregate_limit: usize,
) -> Result<LinkUpdateResult> {
    if topic_id.trim().is_empty() {
        return Err(GraphError::invalid("topic id is required"));
    }
    update_point_links(
        conn,
        &LinkUpdateRequest {
            point_id: point_id.to_string(),
            add: vec![],
            remove: vec![topic_id.to_string()],
        },
        aggregate_limit,
    )
}

/// Union the topic into the point and the point's entry into the topic.
/// Returns whether the point gained a new topic id.
fn attach(conn: &Connection, point: &PrayerPoint, topic_id: &str) -> Result<bool> {
    let delta = union_append(conn, ArrayField::LinkedTopics, &point.id, &ids_to_values(&[topic_id]))?;
    union_append(
        conn,
        ArrayField::Journey,
        topic_id,
        &[journey_value(&point.journey_entry())?],
    )?;
    store::mark_topics_dirty(conn, &[topic_id.to_string()])?;

    let linked = !delta.is_empty();
    if linked {
        write_audit_log(
            conn,
            "link",
            EntityType::Point,
            &point.id,
            Some(&serde_json::json!({"topic_id": topic_id})),
        )?;
    }
    Ok(linked)
}

/// Remove the topic from the point and the point's entry from the topic.
/// Returns whether the point lost a topic id.
pub(crate) fn detach(conn: &Connection, point_id: &str, topic_id: &str) -> Result<bool> {
    let removed = remove_from(conn, ArrayField::LinkedTopics, point_id, &ids_to_values(&[topic_id]))?;
    if store::topic_exists(conn, topic_id)? {
        remove_from(conn, ArrayField::Journey, topic_id, &ids_to_values(&[point_id]))?;
        store::mark_topics_dirty(conn, &[topic_id.to_string()])?;
    }

    if removed > 0 {
        write_audit_log(
            conn,
            "unlink",
            EntityType::Point,
            point_id,
            Some(&serde_json::json!({"topic_id": topic_id})),
        )?;
    }
    Ok(removed > 0)
}

/// Create the topic grouping two points, unless a replay already created it.
/// Returns the topic id and whether it was created now.
fn ensure_pair_topic(
    conn: &Connection,
    first: &PrayerPoint,
    second: &PrayerPoint,
    title: &Option<String>,
    topic_id: &Option<String>,
) -> Result<(String, bool)> {
    let topic_id = topic_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

    if store::topic_exists(conn, &topic_id)? {
        return Ok((topic_id, false));
    }

    let title = title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| Some(first.title.clone()).filter(|t| !t.trim().is_empty()))
        .unwrap_or_else(|| "Untitled topic".to_string());

    store::upsert_topic(
        conn,
        NewTopic {
            id: Some(topic_id.clone()),
            title,
            content: String::new(),
            author_id: first.author_id.clone(),
            author_name: first.author_name.clone(),
            embedding: None,
            embedding_text: None,
        },
    )?;

    let categories = aggregate::dedupe_categories(
        [first.category.as_deref(), second.category.as_deref()]
            .into_iter()
            .flatten(),
    );
    conn.execute(
        "UPDATE prayer_topics SET categories = ?1 WHERE id = ?2",
        rusqlite::params![serde_json::to_string(&categories)?, topic_id],
    )?;

    Ok((topic_id, true))
}

fn aggregate_each(
    tx: &mut Transaction<'_>,
    topic_ids: &[String],
    limit: usize,
) -> Vec<AggregateResult> {
    topic_ids
        .iter()
        .filter_map(|id| aggregate::aggregate_in_savepoint(tx, id, limit))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::store::{create_point, create_topic, NewPoint};

    fn test_db() -> Connection {
        crate::db::open_memory_database().unwrap()
    }

    fn point(conn: &mut Connection, id: &str, category: &str, embedding: Vec<f32>) {
        create_point(
            conn,
            NewPoint {
                id: Some(id.into()),
                title: format!("Title {id}"),
                content: "content".into(),
                category: Some(category.into()),
                author_id: "u1".into(),
                author_name: "Ann".into(),
                embedding: Some(embedding),
                ..Default::default()
            },
        )
        .unwrap();
    }

    fn topic(conn: &mut Connection, id: &str) {
        create_topic(
            conn,
            NewTopic {
                id: Some(id.into()),
                title: "Topic".into(),
                author_id: "u1".into(),
                ..Default::default()
            },
            30,
        )
        .unwrap();
    }

    fn to_topic(point_id: &str, topic_id: &str) -> LinkRequest {
        LinkRequest {
            point_id: point_id.into(),
            target: LinkTarget::Topic { id: topic_id.into() },
        }
    }

    #[test]
    fn test_link_to_existing_topic() {
        let mut conn = test_db();
        point(&mut conn, "p1", "Health", vec![1.0, 0.0]);
        topic(&mut conn, "t1");

        let result = link_point_to_topic(&mut conn, &to_topic("p1", "t1"), 30).unwrap();
        assert_eq!(result.added_topic_ids, vec!["t1"]);
        assert_eq!(result.point.linked_topics, vec!["t1"]);
        assert!(result.created_topic_id.is_none());
        assert_eq!(result.aggregates.len(), 1);

        let t = store::get_topic(&conn, "t1").unwrap().unwrap();
        assert_eq!(t.journey.len(), 1);
        assert_eq!(t.journey[0].id, "p1");
        assert_eq!(t.journey[0].author, "Ann");
        assert_eq!(t.aggregated_embedding, Some(vec![1.0, 0.0]));
        assert_eq!(t.categories, vec!["health"]);
        assert!(!t.aggregate_dirty);
    }

    #[test]
    fn test_link_twice_is_noop() {
        let mut conn = test_db();
        point(&mut conn, "p1", "Health", vec![1.0, 0.0]);
        topic(&mut conn, "t1");

        link_point_to_topic(&mut conn, &to_topic("p1", "t1"), 30).unwrap();
        let again = link_point_to_topic(&mut conn, &to_topic("p1", "t1"), 30).unwrap();

        assert!(again.added_topic_ids.is_empty());
        assert_eq!(again.point.linked_topics, vec!["t1"]);
        let t = store::get_topic(&conn, "t1").unwrap().unwrap();
        assert_eq!(t.journey.len(), 1);
    }

    #[test]
    fn test_link_errors() {
        let mut conn = test_db();
        point(&mut conn, "p1", "Health", vec![1.0, 0.0]);

        let err = link_point_to_topic(&mut conn, &to_topic("", "t1"), 30).unwrap_err();
        assert_eq!(err.code(), "invalid-argument");

        let err = link_point_to_topic(&mut conn, &to_topic("p1", "missing"), 30).unwrap_err();
        assert_eq!(err.code(), "not-found");

        let err = link_point_to_topic(&mut conn, &to_topic("missing", "t1"), 30).unwrap_err();
        assert_eq!(err.code(), "not-found");

        let self_link = LinkRequest {
            point_id: "p1".into(),
            target: LinkTarget::Point {
                id: "p1".into(),
                new_topic_title: None,
                new_topic_id: None,
            },
        };
        let err = link_point_to_topic(&mut conn, &self_link, 30).unwrap_err();
        assert_eq!(err.code(), "invalid-argument");
    }

    #[test]
    fn test_link_two_points_creates_topic() {
        let mut conn = test_db();
        point(&mut conn, "a", "Health", vec![1.0, 0.0]);
        point(&mut conn, "b", "health", vec![0.0, 1.0]);

        let request = LinkRequest {
            point_id: "a".into(),
            target: LinkTarget::Point {
                id: "b".into(),
                new_topic_title: Some("Recovery".into()),
                new_topic_id: Some("t-new".into()),
            },
        };
        let result = link_point_to_topic(&mut conn, &request, 30).unwrap();
        assert_eq!(result.created_topic_id.as_deref(), Some("t-new"));
        assert_eq!(result.added_topic_ids, vec!["t-new"]);

        let t = store::get_topic(&conn, "t-new").unwrap().unwrap();
        assert_eq!(t.title, "Recovery");
        assert_eq!(t.journey.len(), 2);
        assert_eq!(t.categories, vec!["health"]);
        assert_eq!(t.aggregated_embedding, Some(vec![0.5, 0.5]));

        let b = store::get_point(&conn, "b").unwrap().unwrap();
        assert_eq!(b.linked_topics, vec!["t-new"]);

        // Replay with the same topic id creates nothing new
        let replay = link_point_to_topic(&mut conn, &request, 30).unwrap();
        assert!(replay.created_topic_id.is_none());
        assert!(replay.added_topic_ids.is_empty());
        let topics: i64 = conn
            .query_row("SELECT COUNT(*) FROM prayer_topics", [], |r| r.get(0))
            .unwrap();
        assert_eq!(topics, 1);
    }

    #[test]
    fn test_unlink_drops_contribution() {
        let mut conn = test_db();
        point(&mut conn, "a", "Health", vec![1.0, 0.0]);
        point(&mut conn, "b", "Work", vec![0.0, 1.0]);
        topic(&mut conn, "t1");
        link_point_to_topic(&mut conn, &to_topic("a", "t1"), 30).unwrap();
        link_point_to_topic(&mut conn, &to_topic("b", "t1"), 30).unwrap();

        let result = unlink_point_from_topic(&mut conn, "b", "t1", 30).unwrap();
        assert_eq!(result.removed, vec!["t1"]);
        assert!(result.point.linked_topics.is_empty());

        let t = store::get_topic(&conn, "t1").unwrap().unwrap();
        assert_eq!(t.journey.len(), 1);
        assert_eq!(t.aggregated_embedding, Some(vec![1.0, 0.0]));
        assert_eq!(t.categories, vec!["health"]);

        unlink_point_from_topic(&mut conn, "a", "t1", 30).unwrap();
        let t = store::get_topic(&conn, "t1").unwrap().unwrap();
        assert!(t.journey.is_empty());
        assert_eq!(t.aggregated_embedding, None);
        assert!(t.categories.is_empty());
    }

    #[test]
    fn test_update_links_is_all_or_nothing() {
        let mut conn = test_db();
        point(&mut conn, "p1", "Health", vec![1.0, 0.0]);
        topic(&mut conn, "t1");

        let request = LinkUpdateRequest {
            point_id: "p1".into(),
            add: vec!["t1".into(), "missing".into()],
            remove: vec![],
        };
        let err = update_point_links(&mut conn, &request, 30).unwrap_err();
        assert_eq!(err.code(), "invalid-argument");

        // t1 was attached before the failure, but the transaction rolled back
        let p = store::get_point(&conn, "p1").unwrap().unwrap();
        assert!(p.linked_topics.is_empty());
        let t = store::get_topic(&conn, "t1").unwrap().unwrap();
        assert!(t.journey.is_empty());
    }

    #[test]
    fn test_update_links_validation() {
        let mut conn = test_db();
        let empty = LinkUpdateRequest {
            point_id: "p1".into(),
            ..Default::default()
        };
        assert_eq!(update_point_links(&mut conn, &empty, 30).unwrap_err().code(), "invalid-argument");

        let both = LinkUpdateRequest {
            point_id: "p1".into(),
            add: vec!["t1".into()],
            remove: vec!["t1".into()],
        };
        assert_eq!(update_point_links(&mut conn, &both, 30).unwrap_err().code(), "invalid-argument");

        let missing = LinkUpdateRequest {
            point_id: "ghost".into(),
            add: vec!["t1".into()],
            remove: vec![],
        };
        assert_eq!(update_point_links(&mut conn, &missing, 30).unwrap_err().code(), "invalid-argument");
    }

    #[test]
    fn test_remove_dangling_topic_id() {
        let mut conn = test_db();
        point(&mut conn, "p1", "Health", vec![1.0, 0.0]);
        conn.execute(
            "UPDATE prayer_points SET linked_topics = '[\"gone\"]' WHERE id = 'p1'",
            [],
        )
        .unwrap();

        let result = unlink_point_from_topic(&mut conn, "p1", "gone", 30).unwrap();
        assert_eq!(result.removed, vec!["gone"]);
        assert!(result.aggregates.is_empty());
        assert!(result.point.linked_topics.is_empty());
    }
}
