//! Partial updates to points and topics.
//!
//! Each entity kind has an [`EntityEditor`] that knows which fields it accepts
//! and what derived state an edit invalidates. Point edits refresh the journey
//! snapshot in every linked topic; edits that move an aggregate input mark the
//! topic dirty and re-aggregate it before commit.

use rusqlite::{params, Connection};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::graph::aggregate::{self, AggregateResult};
use crate::graph::embedding_to_bytes;
use crate::graph::store::{self, validate_embedding, write_audit_log};
use crate::graph::types::{now_timestamp, EntityType, FieldUpdate, PrayerPoint, PrayerTopic};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityPatch {
    #[serde(default, skip_serializing_if = "FieldUpdate::is_unchanged")]
    pub title: FieldUpdate<String>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_unchanged")]
    pub content: FieldUpdate<String>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_unchanged")]
    pub category: FieldUpdate<String>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_unchanged")]
    pub embedding: FieldUpdate<Vec<f32>>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_unchanged")]
    pub embedding_text: FieldUpdate<String>,
}

impl EntityPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_unchanged()
            && self.content.is_unchanged()
            && self.category.is_unchanged()
            && self.embedding.is_unchanged()
            && self.embedding_text.is_unchanged()
    }

    /// Names of the fields this patch touches, for the audit log.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        [
            ("title", self.title.is_unchanged()),
            ("content", self.content.is_unchanged()),
            ("category", self.category.is_unchanged()),
            ("embedding", self.embedding.is_unchanged()),
            ("embeddingText", self.embedding_text.is_unchanged()),
        ]
        .into_iter()
        .filter(|(_, unchanged)| !unchanged)
        .map(|(name, _)| name)
        .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(GraphError::invalid("update contains no changes"));
        }
        if self.title == FieldUpdate::Clear {
            return Err(GraphError::invalid("title cannot be cleared"));
        }
        if self.content == FieldUpdate::Clear {
            return Err(GraphError::invalid("content cannot be cleared"));
        }
        if let FieldUpdate::Set(embedding) = &self.embedding {
            if embedding.is_empty() {
                return Err(GraphError::invalid("embedding cannot be empty; clear it instead"));
            }
            validate_embedding(Some(embedding.as_slice()))?;
        }
        Ok(())
    }
}

/// The entity as stored after an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdatedEntity {
    Point(PrayerPoint),
    Topic(PrayerTopic),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub entity: UpdatedEntity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregates: Vec<AggregateResult>,
}

/// Applies a patch to one kind of entity. Runs on the caller's transaction
/// and returns the updated entity plus the topics whose aggregate moved.
pub trait EntityEditor {
    fn entity_type(&self) -> EntityType;

    fn apply(
        &self,
        conn: &Connection,
        id: &str,
        patch: EntityPatch,
    ) -> Result<(UpdatedEntity, Vec<String>)>;
}

pub struct PointEditor;

impl EntityEditor for PointEditor {
    fn entity_type(&self) -> EntityType {
        EntityType::Point
    }

    fn apply(
        &self,
        conn: &Connection,
        id: &str,
        patch: EntityPatch,
    ) -> Result<(UpdatedEntity, Vec<String>)> {
        let before = store::require_point(conn, id)?;
        let fields = patch.changed_fields();

        let title = set_or(patch.title, &before.title);
        let content = set_or(patch.content, &before.content);
        let category = patch
            .category
            .apply_to(before.category.clone())
            .filter(|c| !c.trim().is_empty());
        let embedding = patch.embedding.apply_to(before.embedding.clone());
        let embedding_text = patch.embedding_text.apply_to(before.embedding_text.clone());

        conn.execute(
            "UPDATE prayer_points SET title = ?1, content = ?2, category = ?3, embedding = ?4, \
             embedding_text = ?5, updated_at = ?6 WHERE id = ?7",
            params![
                title,
                content,
                category,
                embedding.as_deref().map(embedding_to_bytes),
                embedding_text,
                now_timestamp(),
                id,
            ],
        )?;

        let after = store::require_point(conn, id)?;
        store::refresh_point_in_topics(conn, &before, &after)?;
        write_audit_log(
            conn,
            "update",
            EntityType::Point,
            id,
            Some(&serde_json::json!({"fields": fields})),
        )?;

        let moved = before.category != after.category || before.embedding != after.embedding;
        let mut topics = Vec::new();
        if moved {
            for topic_id in &after.linked_topics {
                if store::topic_exists(conn, topic_id)? {
                    topics.push(topic_id.clone());
                }
            }
        }
        Ok((UpdatedEntity::Point(after), topics))
    }
}

pub struct TopicEditor;

impl EntityEditor for TopicEditor {
    fn entity_type(&self) -> EntityType {
        EntityType::Topic
    }

    fn apply(
        &self,
        conn: &Connection,
        id: &str,
        patch: EntityPatch,
    ) -> Result<(UpdatedEntity, Vec<String>)> {
        if !patch.category.is_unchanged() {
            return Err(GraphError::invalid(
                "topic categories are derived from linked points and cannot be edited",
            ));
        }

        let before = store::require_topic(conn, id)?;
        let fields = patch.changed_fields();
        let embedding_changed = !patch.embedding.is_unchanged();

        let title = set_or(patch.title, &before.title);
        let content = set_or(patch.content, &before.content);
        let embedding = patch.embedding.apply_to(before.embedding.clone());
        let embedding_text = patch.embedding_text.apply_to(before.embedding_text.clone());

        conn.execute(
            "UPDATE prayer_topics SET title = ?1, content = ?2, embedding = ?3, embedding_text = ?4, \
             updated_at = ?5, aggregate_dirty = (aggregate_dirty OR ?6) WHERE id = ?7",
            params![
                title,
                content,
                embedding.as_deref().map(embedding_to_bytes),
                embedding_text,
                now_timestamp(),
                embedding_changed,
                id,
            ],
        )?;

        write_audit_log(
            conn,
            "update",
            EntityType::Topic,
            id,
            Some(&serde_json::json!({"fields": fields})),
        )?;

        let after = store::require_topic(conn, id)?;
        let topics = if embedding_changed { vec![id.to_string()] } else { vec![] };
        Ok((UpdatedEntity::Topic(after), topics))
    }
}

pub fn editor_for(entity_type: EntityType) -> Box<dyn EntityEditor> {
    match entity_type {
        EntityType::Point => Box::new(PointEditor),
        EntityType::Topic => Box::new(TopicEditor),
    }
}

/// Apply a partial update and re-aggregate any topic whose inputs changed.
pub fn update_entity(
    conn: &mut Connection,
    entity_type: EntityType,
    id: &str,
    patch: EntityPatch,
    aggregate_limit: usize,
) -> Result<UpdateResult> {
    if id.trim().is_empty() {
        return Err(GraphError::invalid(format!("{entity_type} id is required")));
    }
    patch.validate()?;

    let editor = editor_for(entity_type);
    let mut tx = conn.transaction()?;
    let (entity, dirty) = editor.apply(&tx, id, patch)?;

    let aggregates: Vec<AggregateResult> = dirty
        .iter()
        .filter_map(|topic_id| aggregate::aggregate_in_savepoint(&mut tx, topic_id, aggregate_limit))
        .collect();

    // Re-read so the returned entity reflects the fresh aggregate.
    let entity = match entity {
        UpdatedEntity::Topic(_) if !aggregates.is_empty() => {
            UpdatedEntity::Topic(store::require_topic(&tx, id)?)
        }
        other => other,
    };

    tx.commit()?;
    tracing::info!(
        entity_type = %editor.entity_type(),
        id = %id,
        reaggregated = aggregates.len(),
        "entity updated"
    );
    Ok(UpdateResult { entity, aggregates })
}

fn set_or(update: FieldUpdate<String>, current: &str) -> String {
    match update {
        FieldUpdate::Set(v) => v,
        _ => current.to_string(),
    }
}
