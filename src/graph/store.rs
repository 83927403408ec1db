//! Document read/write path for points and topics.
//!
//! Creation is an upsert keyed by a caller-assigned id ("set with merge"), so a
//! replayed create never clobbers link state. Denormalized arrays are only ever
//! changed through [`union_append`] and [`remove_from`], which apply the deltas
//! computed by [`crate::graph::merge`] inside the caller's transaction.

use chrono::{DateTime, FixedOffset};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GraphError, Result};
use crate::graph::types::{
    normalize_timestamp, now_timestamp, EntityType, JourneyEntry, PrayerPoint, PrayerTopic,
};
use crate::graph::{aggregate, bytes_to_embedding, embedding_to_bytes, merge};

pub(crate) const POINT_COLUMNS: &str = "id, title, content, category, author_id, author_name, \
     recipients, created_at, updated_at, linked_topics, embedding, embedding_text, prayer_id";

pub(crate) const TOPIC_COLUMNS: &str = "id, title, content, author_id, author_name, created_at, \
     updated_at, journey, embedding, embedding_text, aggregated_embedding, categories, \
     aggregated_at, aggregate_dirty";

/// Input for [`create_point`]. A missing `id` is assigned a UUID v7.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPoint {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub category: Option<String>,
    pub author_id: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    /// Client-side creation time (RFC 3339), kept for points created offline.
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub embedding_text: Option<String>,
    #[serde(default)]
    pub prayer_id: Option<String>,
}

impl NewPoint {
    pub fn validate(&self) -> Result<()> {
        if self.author_id.trim().is_empty() {
            return Err(GraphError::invalid("point author id is required"));
        }
        if self.title.trim().is_empty() && self.content.trim().is_empty() {
            return Err(GraphError::invalid("point needs a title or content"));
        }
        if let Some(raw) = &self.created_at {
            normalize_timestamp(raw)?;
        }
        validate_embedding(self.embedding.as_deref())
    }
}

/// Input for [`create_topic`]. A missing `id` is assigned a UUID v7.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTopic {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub author_id: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub embedding_text: Option<String>,
}

impl NewTopic {
    pub fn validate(&self) -> Result<()> {
        if self.author_id.trim().is_empty() {
            return Err(GraphError::invalid("topic author id is required"));
        }
        if self.title.trim().is_empty() {
            return Err(GraphError::invalid("topic title is required"));
        }
        validate_embedding(self.embedding.as_deref())
    }
}

pub(crate) fn validate_embedding(embedding: Option<&[f32]>) -> Result<()> {
    match embedding {
        Some(e) if e.iter().any(|x| !x.is_finite()) => {
            Err(GraphError::invalid("embedding contains non-finite values"))
        }
        _ => Ok(()),
    }
}

/// Create or merge-update a point. Never touches `linked_topics`.
pub fn create_point(conn: &mut Connection, new: NewPoint) -> Result<PrayerPoint> {
    new.validate()?;
    let tx = conn.transaction()?;
    let point = upsert_point(&tx, new)?;
    tx.commit()?;
    Ok(point)
}

pub(crate) fn upsert_point(conn: &Connection, new: NewPoint) -> Result<PrayerPoint> {
    let id = new
        .id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
    let now = now_timestamp();
    let created_at = match &new.created_at {
        Some(raw) => normalize_timestamp(raw)?,
        None => now.clone(),
    };
    let previous = get_point(conn, &id)?;

    let embedding = new
        .embedding
        .as_deref()
        .filter(|e| !e.is_empty())
        .map(embedding_to_bytes);
    let recipients = serde_json::to_string(&new.recipients)?;

    conn.execute(
        "INSERT INTO prayer_points (id, title, content, category, author_id, author_name, recipients, \
         created_at, updated_at, embedding, embedding_text, prayer_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
         ON CONFLICT(id) DO UPDATE SET \
           title = excluded.title, \
           content = excluded.content, \
           category = excluded.category, \
           author_name = excluded.author_name, \
           recipients = excluded.recipients, \
           updated_at = excluded.updated_at, \
           embedding = COALESCE(excluded.embedding, prayer_points.embedding), \
           embedding_text = COALESCE(excluded.embedding_text, prayer_points.embedding_text), \
           prayer_id = COALESCE(excluded.prayer_id, prayer_points.prayer_id)",
        params![
            id,
            new.title,
            new.content,
            new.category,
            new.author_id,
            new.author_name,
            recipients,
            created_at,
            now,
            embedding,
            new.embedding_text,
            new.prayer_id,
        ],
    )?;

    let point = require_point(conn, &id)?;
    match previous {
        None => write_audit_log(conn, "create", EntityType::Point, &id, None)?,
        Some(before) => {
            refresh_point_in_topics(conn, &before, &point)?;
            write_audit_log(
                conn,
                "update",
                EntityType::Point,
                &id,
                Some(&serde_json::json!({"reason": "upsert"})),
            )?;
        }
    }

    tracing::debug!(point_id = %id, "point upserted");
    Ok(point)
}

/// Create or merge-update a topic. Never touches `journey`. The aggregate is
/// recomputed so a topic's own embedding is reflected immediately.
pub fn create_topic(
    conn: &mut Connection,
    new: NewTopic,
    aggregate_limit: usize,
) -> Result<PrayerTopic> {
    new.validate()?;
    let mut tx = conn.transaction()?;
    let id = upsert_topic(&tx, new)?;
    aggregate::aggregate_in_savepoint(&mut tx, &id, aggregate_limit);
    let topic = require_topic(&tx, &id)?;
    tx.commit()?;
    Ok(topic)
}

/// Upsert the topic row and return its id.
pub(crate) fn upsert_topic(conn: &Connection, new: NewTopic) -> Result<String> {
    let id = new
        .id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
    let now = now_timestamp();
    let existed = topic_exists(conn, &id)?;
    let embedding = new
        .embedding
        .as_deref()
        .filter(|e| !e.is_empty())
        .map(embedding_to_bytes);

    conn.execute(
        "INSERT INTO prayer_topics (id, title, content, author_id, author_name, created_at, updated_at, \
         embedding, embedding_text, aggregate_dirty) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8, 1) \
         ON CONFLICT(id) DO UPDATE SET \
           title = excluded.title, \
           content = excluded.content, \
           author_name = excluded.author_name, \
           updated_at = excluded.updated_at, \
           embedding = COALESCE(excluded.embedding, prayer_topics.embedding), \
           embedding_text = COALESCE(excluded.embedding_text, prayer_topics.embedding_text), \
           aggregate_dirty = 1",
        params![
            id,
            new.title,
            new.content,
            new.author_id,
            new.author_name,
            now,
            embedding,
            new.embedding_text,
        ],
    )?;

    let op = if existed { "update" } else { "create" };
    write_audit_log(conn, op, EntityType::Topic, &id, None)?;
    Ok(id)
}

// ── Reads ─────────────────────────────────────────────────────────────────────

pub fn get_point(conn: &Connection, id: &str) -> Result<Option<PrayerPoint>> {
    let sql = format!("SELECT {POINT_COLUMNS} FROM prayer_points WHERE id = ?1");
    let row = conn.query_row(&sql, params![id], read_point_row).optional()?;
    row.map(PointRow::into_point).transpose()
}

pub fn get_topic(conn: &Connection, id: &str) -> Result<Option<PrayerTopic>> {
    let sql = format!("SELECT {TOPIC_COLUMNS} FROM prayer_topics WHERE id = ?1");
    let row = conn.query_row(&sql, params![id], read_topic_row).optional()?;
    row.map(TopicRow::into_topic).transpose()
}

pub fn require_point(conn: &Connection, id: &str) -> Result<PrayerPoint> {
    get_point(conn, id)?.ok_or_else(|| GraphError::not_found(format!("point not found: {id}")))
}

pub fn require_topic(conn: &Connection, id: &str) -> Result<PrayerTopic> {
    get_topic(conn, id)?.ok_or_else(|| GraphError::not_found(format!("topic not found: {id}")))
}

pub(crate) fn topic_exists(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT COUNT(*) > 0 FROM prayer_topics WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?)
}

/// The `limit` most recent points linked to a topic, newest first.
pub fn linked_points(conn: &Connection, topic_id: &str, limit: usize) -> Result<Vec<PrayerPoint>> {
    let sql = format!(
        "SELECT {POINT_COLUMNS} FROM prayer_points \
         WHERE EXISTS (SELECT 1 FROM json_each(prayer_points.linked_topics) WHERE json_each.value = ?1) \
         ORDER BY created_at DESC, id DESC LIMIT ?2"
    );
    query_points(conn, &sql, params![topic_id, limit as i64])
}

/// Ids of every point linked to a topic.
pub(crate) fn linked_point_ids(conn: &Connection, topic_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM prayer_points \
         WHERE EXISTS (SELECT 1 FROM json_each(prayer_points.linked_topics) WHERE json_each.value = ?1)",
    )?;
    let ids = stmt
        .query_map(params![topic_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub(crate) fn query_points(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<PrayerPoint>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, read_point_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(PointRow::into_point).collect()
}

pub(crate) fn query_topics(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<PrayerTopic>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, read_topic_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(TopicRow::into_topic).collect()
}

// ── Denormalized arrays ───────────────────────────────────────────────────────

/// A denormalized JSON array column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArrayField {
    /// `prayer_points.linked_topics`: bare topic ids.
    LinkedTopics,
    /// `prayer_topics.journey`: journey entry objects.
    Journey,
}

impl ArrayField {
    fn owner(self) -> EntityType {
        match self {
            Self::LinkedTopics => EntityType::Point,
            Self::Journey => EntityType::Topic,
        }
    }

    fn select_sql(self) -> &'static str {
        match self {
            Self::LinkedTopics => "SELECT linked_topics FROM prayer_points WHERE id = ?1",
            Self::Journey => "SELECT journey FROM prayer_topics WHERE id = ?1",
        }
    }

    fn update_sql(self) -> &'static str {
        match self {
            Self::LinkedTopics => {
                "UPDATE prayer_points SET linked_topics = ?1, updated_at = ?2 WHERE id = ?3"
            }
            Self::Journey => "UPDATE prayer_topics SET journey = ?1, updated_at = ?2 WHERE id = ?3",
        }
    }
}

fn read_array(conn: &Connection, field: ArrayField, id: &str) -> Result<Vec<Value>> {
    let raw: Option<String> = conn
        .query_row(field.select_sql(), params![id], |row| row.get(0))
        .optional()?;
    let raw = raw.ok_or_else(|| GraphError::not_found(format!("{} not found: {id}", field.owner())))?;
    parse_json_array(&raw, "array field")
}

fn write_array(conn: &Connection, field: ArrayField, id: &str, values: &[Value]) -> Result<()> {
    let json = serde_json::to_string(values)?;
    conn.execute(field.update_sql(), params![json, now_timestamp(), id])?;
    Ok(())
}

/// Union-append `to_add` into an array field. Returns the delta actually appended.
pub(crate) fn union_append(
    conn: &Connection,
    field: ArrayField,
    id: &str,
    to_add: &[Value],
) -> Result<Vec<Value>> {
    let mut current = read_array(conn, field, id)?;
    let delta = merge::add_merge(&current, to_add);
    if delta.is_empty() {
        return Ok(delta);
    }

    current.extend(delta.iter().cloned());
    if field == ArrayField::Journey {
        sort_journey(&mut current);
    }
    write_array(conn, field, id, &current)?;
    Ok(delta)
}

/// Remove ids from an array field. Returns how many entries were removed.
pub(crate) fn remove_from(
    conn: &Connection,
    field: ArrayField,
    id: &str,
    to_remove: &[Value],
) -> Result<usize> {
    let current = read_array(conn, field, id)?;
    let survivors = merge::remove_merge(&current, to_remove);
    let removed = current.len() - survivors.len();
    if removed > 0 {
        write_array(conn, field, id, &survivors)?;
    }
    Ok(removed)
}

/// Newest first; entries without a parseable `createdAt` sink to the end.
fn sort_journey(entries: &mut [Value]) {
    fn created(v: &Value) -> Option<DateTime<FixedOffset>> {
        v.get("createdAt")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    }
    entries.sort_by(|a, b| created(b).cmp(&created(a)));
}

pub(crate) fn journey_value(entry: &JourneyEntry) -> Result<Value> {
    Ok(serde_json::to_value(entry)?)
}

/// Replace a point's snapshot in a topic's journey.
pub(crate) fn replace_journey_entry(conn: &Connection, topic_id: &str, entry: &JourneyEntry) -> Result<()> {
    remove_from(conn, ArrayField::Journey, topic_id, &merge::ids_to_values(&[&entry.id]))?;
    union_append(conn, ArrayField::Journey, topic_id, &[journey_value(entry)?])?;
    Ok(())
}

/// Keep linked topics consistent after a point changed: refresh journey
/// snapshots and flag aggregates whose inputs moved.
pub(crate) fn refresh_point_in_topics(
    conn: &Connection,
    before: &PrayerPoint,
    after: &PrayerPoint,
) -> Result<()> {
    if after.linked_topics.is_empty() {
        return Ok(());
    }

    let entry = after.journey_entry();
    if before.journey_entry() != entry {
        for topic_id in &after.linked_topics {
            if topic_exists(conn, topic_id)? {
                replace_journey_entry(conn, topic_id, &entry)?;
            }
        }
    }

    if before.category != after.category || before.embedding != after.embedding {
        mark_topics_dirty(conn, &after.linked_topics)?;
    }
    Ok(())
}

/// Flag topics whose aggregate no longer matches their inputs.
pub(crate) fn mark_topics_dirty(conn: &Connection, topic_ids: &[String]) -> Result<()> {
    let mut stmt = conn.prepare("UPDATE prayer_topics SET aggregate_dirty = 1 WHERE id = ?1")?;
    for id in topic_ids {
        stmt.execute(params![id])?;
    }
    Ok(())
}

/// Write an entry to the graph_log audit table.
pub(crate) fn write_audit_log(
    conn: &Connection,
    operation: &str,
    entity_type: EntityType,
    entity_id: &str,
    details: Option<&Value>,
) -> Result<()> {
    let details_json = details.map(|d| d.to_string());
    conn.execute(
        "INSERT INTO graph_log (operation, entity_type, entity_id, details, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![operation, entity_type.as_str(), entity_id, details_json, now_timestamp()],
    )?;
    Ok(())
}

/// One row of the graph_log audit table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub operation: String,
    pub entity_type: String,
    pub entity_id: String,
    pub details: Option<Value>,
    pub created_at: String,
}

/// Audit history for one entity, oldest first.
pub fn entity_log(conn: &Connection, entity_id: &str, limit: usize) -> Result<Vec<LogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT operation, entity_type, entity_id, details, created_at FROM graph_log \
         WHERE entity_id = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let mut entries = stmt
        .query_map(params![entity_id, limit as i64], |row| {
            let details: Option<String> = row.get(3)?;
            Ok(LogEntry {
                operation: row.get(0)?,
                entity_type: row.get(1)?,
                entity_id: row.get(2)?,
                details: details.and_then(|d| serde_json::from_str(&d).ok()),
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    entries.reverse();
    Ok(entries)
}

// ── Row mapping ───────────────────────────────────────────────────────────────

struct PointRow {
    id: String,
    title: String,
    content: String,
    category: Option<String>,
    author_id: String,
    author_name: String,
    recipients: String,
    created_at: String,
    updated_at: String,
    linked_topics: String,
    embedding: Option<Vec<u8>>,
    embedding_text: Option<String>,
    prayer_id: Option<String>,
}

fn read_point_row(row: &Row<'_>) -> rusqlite::Result<PointRow> {
    Ok(PointRow {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        category: row.get(3)?,
        author_id: row.get(4)?,
        author_name: row.get(5)?,
        recipients: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        linked_topics: row.get(9)?,
        embedding: row.get(10)?,
        embedding_text: row.get(11)?,
        prayer_id: row.get(12)?,
    })
}

impl PointRow {
    fn into_point(self) -> Result<PrayerPoint> {
        Ok(PrayerPoint {
            entity_type: EntityType::Point,
            recipients: parse_json_array(&self.recipients, "recipients")?,
            linked_topics: parse_json_array(&self.linked_topics, "linked_topics")?,
            embedding: decode_embedding(self.embedding),
            id: self.id,
            title: self.title,
            content: self.content,
            category: self.category,
            author_id: self.author_id,
            author_name: self.author_name,
            created_at: self.created_at,
            updated_at: self.updated_at,
            embedding_text: self.embedding_text,
            prayer_id: self.prayer_id,
        })
    }
}

struct TopicRow {
    id: String,
    title: String,
    content: String,
    author_id: String,
    author_name: String,
    created_at: String,
    updated_at: String,
    journey: String,
    embedding: Option<Vec<u8>>,
    embedding_text: Option<String>,
    aggregated_embedding: Option<Vec<u8>>,
    categories: String,
    aggregated_at: Option<String>,
    aggregate_dirty: bool,
}

fn read_topic_row(row: &Row<'_>) -> rusqlite::Result<TopicRow> {
    Ok(TopicRow {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        author_id: row.get(3)?,
        author_name: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        journey: row.get(7)?,
        embedding: row.get(8)?,
        embedding_text: row.get(9)?,
        aggregated_embedding: row.get(10)?,
        categories: row.get(11)?,
        aggregated_at: row.get(12)?,
        aggregate_dirty: row.get(13)?,
    })
}

impl TopicRow {
    fn into_topic(self) -> Result<PrayerTopic> {
        Ok(PrayerTopic {
            entity_type: EntityType::Topic,
            journey: parse_json_array(&self.journey, "journey")?,
            categories: parse_json_array(&self.categories, "categories")?,
            embedding: decode_embedding(self.embedding),
            aggregated_embedding: decode_embedding(self.aggregated_embedding),
            id: self.id,
            title: self.title,
            content: self.content,
            author_id: self.author_id,
            author_name: self.author_name,
            created_at: self.created_at,
            updated_at: self.updated_at,
            embedding_text: self.embedding_text,
            aggregated_at: self.aggregated_at,
            aggregate_dirty: self.aggregate_dirty,
        })
    }
}

fn decode_embedding(bytes: Option<Vec<u8>>) -> Option<Vec<f32>> {
    bytes
        .map(|b| bytes_to_embedding(&b))
        .filter(|e| !e.is_empty())
}

fn parse_json_array<T: DeserializeOwned>(raw: &str, column: &str) -> Result<Vec<T>> {
    serde_json::from_str(raw)
        .map_err(|e| GraphError::internal(format!("corrupt {column} column: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_db() -> Connection {
        crate::db::open_memory_database().unwrap()
    }

    fn new_point(id: &str, created_at: &str) -> NewPoint {
        NewPoint {
            id: Some(id.into()),
            title: format!("Point {id}"),
            content: "Pray for healing".into(),
            category: Some("Health".into()),
            author_id: "u1".into(),
            author_name: "Ann".into(),
            recipients: vec!["Bob".into()],
            created_at: Some(created_at.into()),
            embedding: Some(vec![1.0, 0.0]),
            ..Default::default()
        }
    }

    fn new_topic(id: &str) -> NewTopic {
        NewTopic {
            id: Some(id.into()),
            title: "Family".into(),
            author_id: "u1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_get_point() {
        let mut conn = test_db();
        let point = create_point(&mut conn, new_point("p1", "2024-05-01T08:00:00Z")).unwrap();

        assert_eq!(point.entity_type, EntityType::Point);
        assert_eq!(point.title, "Point p1");
        assert_eq!(point.recipients, vec!["Bob".to_string()]);
        assert_eq!(point.created_at, "2024-05-01T08:00:00.000000Z");
        assert_eq!(point.embedding, Some(vec![1.0, 0.0]));
        assert!(point.linked_topics.is_empty());

        let fetched = get_point(&conn, "p1").unwrap().unwrap();
        assert_eq!(fetched, point);
    }

    #[test]
    fn test_create_point_assigns_id() {
        let mut conn = test_db();
        let mut input = new_point("", "2024-05-01T08:00:00Z");
        input.id = None;
        let point = create_point(&mut conn, input).unwrap();
        assert!(uuid::Uuid::parse_str(&point.id).is_ok());
    }

    #[test]
    fn test_upsert_preserves_links_and_embedding() {
        let mut conn = test_db();
        create_point(&mut conn, new_point("p1", "2024-05-01T08:00:00Z")).unwrap();
        conn.execute(
            "UPDATE prayer_points SET linked_topics = '[\"t1\"]' WHERE id = 'p1'",
            [],
        )
        .unwrap();

        let mut replay = new_point("p1", "2024-05-01T08:00:00Z");
        replay.title = "Renamed".into();
        replay.embedding = None;
        let point = create_point(&mut conn, replay).unwrap();

        assert_eq!(point.title, "Renamed");
        assert_eq!(point.linked_topics, vec!["t1".to_string()]);
        assert_eq!(point.embedding, Some(vec![1.0, 0.0]));

        let ops: Vec<String> = conn
            .prepare("SELECT operation FROM graph_log WHERE entity_id = 'p1' ORDER BY id")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(ops, vec!["create", "update"]);
    }

    #[test]
    fn test_create_point_validation() {
        let mut conn = test_db();

        let mut input = new_point("p1", "2024-05-01T08:00:00Z");
        input.author_id = " ".into();
        assert_eq!(create_point(&mut conn, input).unwrap_err().code(), "invalid-argument");

        let mut input = new_point("p1", "2024-05-01T08:00:00Z");
        input.created_at = Some("last tuesday".into());
        assert_eq!(create_point(&mut conn, input).unwrap_err().code(), "invalid-argument");

        let mut input = new_point("p1", "2024-05-01T08:00:00Z");
        input.embedding = Some(vec![f32::INFINITY]);
        assert_eq!(create_point(&mut conn, input).unwrap_err().code(), "invalid-argument");
    }

    #[test]
    fn test_create_topic_with_own_embedding_aggregates() {
        let mut conn = test_db();
        let mut input = new_topic("t1");
        input.embedding = Some(vec![0.0, 2.0]);
        let topic = create_topic(&mut conn, input, 30).unwrap();

        assert_eq!(topic.entity_type, EntityType::Topic);
        assert_eq!(topic.aggregated_embedding, Some(vec![0.0, 2.0]));
        assert!(!topic.aggregate_dirty);
        assert!(topic.aggregated_at.is_some());
    }

    #[test]
    fn test_union_append_returns_delta() {
        let mut conn = test_db();
        create_point(&mut conn, new_point("p1", "2024-05-01T08:00:00Z")).unwrap();

        let delta = union_append(&conn, ArrayField::LinkedTopics, "p1", &[json!("t1"), json!("t2")]).unwrap();
        assert_eq!(delta.len(), 2);
        let delta = union_append(&conn, ArrayField::LinkedTopics, "p1", &[json!("t2"), json!("t3")]).unwrap();
        assert_eq!(delta, vec![json!("t3")]);

        let point = get_point(&conn, "p1").unwrap().unwrap();
        assert_eq!(point.linked_topics, vec!["t1", "t2", "t3"]);

        let removed = remove_from(&conn, ArrayField::LinkedTopics, "p1", &[json!("t2"), json!("zz")]).unwrap();
        assert_eq!(removed, 1);
        let point = get_point(&conn, "p1").unwrap().unwrap();
        assert_eq!(point.linked_topics, vec!["t1", "t3"]);
    }

    #[test]
    fn test_journey_stays_sorted_newest_first() {
        let mut conn = test_db();
        create_topic(&mut conn, new_topic("t1"), 30).unwrap();
        let older = create_point(&mut conn, new_point("p1", "2024-01-01T00:00:00Z")).unwrap();
        let newer = create_point(&mut conn, new_point("p2", "2024-06-01T00:00:00Z")).unwrap();

        for p in [&older, &newer, &older] {
            union_append(&conn, ArrayField::Journey, "t1", &[journey_value(&p.journey_entry()).unwrap()])
                .unwrap();
        }

        let topic = get_topic(&conn, "t1").unwrap().unwrap();
        let ids: Vec<&str> = topic.journey.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p1"]);
    }

    #[test]
    fn test_array_ops_on_missing_document() {
        let conn = test_db();
        let err = union_append(&conn, ArrayField::Journey, "nope", &[json!("x")]).unwrap_err();
        assert_eq!(err.code(), "not-found");
        assert!(require_point(&conn, "nope").is_err());
    }

    #[test]
    fn test_linked_points_filters_by_topic() {
        let mut conn = test_db();
        create_point(&mut conn, new_point("p1", "2024-01-01T00:00:00Z")).unwrap();
        create_point(&mut conn, new_point("p2", "2024-02-01T00:00:00Z")).unwrap();
        create_point(&mut conn, new_point("p3", "2024-03-01T00:00:00Z")).unwrap();
        union_append(&conn, ArrayField::LinkedTopics, "p1", &[json!("t1")]).unwrap();
        union_append(&conn, ArrayField::LinkedTopics, "p3", &[json!("t1"), json!("t2")]).unwrap();

        let linked: Vec<String> = linked_points(&conn, "t1", 30)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(linked, vec!["p3", "p1"]);

        let limited = linked_points(&conn, "t1", 1).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, "p3");
    }

    #[test]
    fn test_entity_log_is_oldest_first() {
        let mut conn = test_db();
        create_point(&mut conn, new_point("p1", "2024-05-01T08:00:00Z")).unwrap();
        write_audit_log(&conn, "update", EntityType::Point, "p1", Some(&json!({"fields": ["title"]})))
            .unwrap();

        let log = entity_log(&conn, "p1", 10).unwrap();
        let ops: Vec<&str> = log.iter().map(|e| e.operation.as_str()).collect();
        assert_eq!(ops, vec!["create", "update"]);
        assert_eq!(log[1].details, Some(json!({"fields": ["title"]})));

        let latest = entity_log(&conn, "p1", 1).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].operation, "update");
    }
}
