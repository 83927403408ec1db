//! Entity deletion with link cleanup.
//!
//! Deleting one side of a link removes the other side's reference in the same
//! transaction, so no point keeps a dangling topic id and no topic keeps a
//! journey entry for a point that is gone.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::graph::aggregate::{self, AggregateResult};
use crate::graph::link::detach;
use crate::graph::store::{self, write_audit_log};
use crate::graph::types::EntityType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub entity_type: EntityType,
    pub id: String,
    /// False when the entity did not exist. Deleting twice is not an error.
    pub deleted: bool,
    /// Ids on the other side of the removed links.
    pub affected: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregates: Vec<AggregateResult>,
}

pub fn delete_entity(
    conn: &mut Connection,
    entity_type: EntityType,
    id: &str,
    aggregate_limit: usize,
) -> Result<DeleteResult> {
    if id.trim().is_empty() {
        return Err(GraphError::invalid(format!("{entity_type} id is required")));
    }

    let mut tx = conn.transaction()?;
    let mut result = DeleteResult {
        entity_type,
        id: id.to_string(),
        deleted: false,
        affected: Vec::new(),
        aggregates: Vec::new(),
    };

    match entity_type {
        EntityType::Point => {
            let Some(point) = store::get_point(&tx, id)? else {
                tracing::debug!(point_id = %id, "delete of missing point ignored");
                return Ok(result);
            };
            for topic_id in &point.linked_topics {
                detach(&tx, id, topic_id)?;
                if store::topic_exists(&tx, topic_id)? {
                    result.affected.push(topic_id.clone());
                }
            }
            tx.execute("DELETE FROM prayer_points WHERE id = ?1", params![id])?;
        }
        EntityType::Topic => {
            if !store::topic_exists(&tx, id)? {
                tracing::debug!(topic_id = %id, "delete of missing topic ignored");
                return Ok(result);
            }
            for point_id in store::linked_point_ids(&tx, id)? {
                detach(&tx, &point_id, id)?;
                result.affected.push(point_id);
            }
            tx.execute("DELETE FROM prayer_topics WHERE id = ?1", params![id])?;
        }
    }

    write_audit_log(
        &tx,
        "delete",
        entity_type,
        id,
        Some(&serde_json::json!({"affected": result.affected})),
    )?;
    result.deleted = true;

    // Topics that lost a point need a fresh aggregate.
    if entity_type == EntityType::Point {
        result.aggregates = result
            .affected
            .iter()
            .filter_map(|topic_id| aggregate::aggregate_in_savepoint(&mut tx, topic_id, aggregate_limit))
            .collect();
    }

    tx.commit()?;
    tracing::info!(
        entity_type = %entity_type,
        id = %id,
        affected = result.affected.len(),
        "entity deleted"
    );
    Ok(result)
}
