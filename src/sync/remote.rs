//! The boundary between the client and the graph store.

use async_trait::async_trait;
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::error::{GraphError, Result};
use crate::graph::aggregate::{self, AggregateResult};
use crate::graph::delete::{self, DeleteResult};
use crate::graph::editor::{self, UpdateResult};
use crate::graph::link::{self, LinkResult, LinkUpdateResult};
use crate::graph::store;
use crate::graph::types::{PrayerPoint, PrayerTopic};
use crate::sync::queue::PendingOperation;

/// What the graph returned for an applied operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "result", rename_all = "camelCase")]
pub enum OperationResult {
    Point(PrayerPoint),
    Topic(PrayerTopic),
    Link(LinkResult),
    LinkUpdate(LinkUpdateResult),
    Delete(DeleteResult),
    Update(UpdateResult),
    Aggregate(AggregateResult),
}

/// Something that can apply a [`PendingOperation`]. A `Transient` error means
/// "try again later"; anything else is final for this attempt.
#[async_trait]
pub trait RemoteGraph: Send + Sync {
    async fn apply(&self, operation: &PendingOperation) -> Result<OperationResult>;
}

/// Apply an operation to a graph database on the current thread.
pub fn apply_operation(
    conn: &mut Connection,
    operation: &PendingOperation,
    aggregate_limit: usize,
) -> Result<OperationResult> {
    let result = match operation {
        PendingOperation::CreatePoint(p) => {
            OperationResult::Point(store::create_point(conn, p.clone())?)
        }
        PendingOperation::CreateTopic(t) => {
            OperationResult::Topic(store::create_topic(conn, t.clone(), aggregate_limit)?)
        }
        PendingOperation::LinkPointToTopic(r) => {
            OperationResult::Link(link::link_point_to_topic(conn, r, aggregate_limit)?)
        }
        PendingOperation::UpdatePointLinks(r) => {
            OperationResult::LinkUpdate(link::update_point_links(conn, r, aggregate_limit)?)
        }
        PendingOperation::DeleteEntity(r) => OperationResult::Delete(delete::delete_entity(
            conn,
            r.entity_type,
            &r.id,
            aggregate_limit,
        )?),
        PendingOperation::UpdateEntity(r) => OperationResult::Update(editor::update_entity(
            conn,
            r.entity_type,
            &r.id,
            r.patch.clone(),
            aggregate_limit,
        )?),
        PendingOperation::RecomputeTopicAggregate(r) => OperationResult::Aggregate(
            aggregate::recompute_topic_aggregate(conn, &r.topic_id, aggregate_limit)?,
        ),
    };
    Ok(result)
}

/// The SQLite graph, shared with the MCP tools.
pub struct LocalRemote {
    db: Arc<Mutex<Connection>>,
    aggregate_limit: usize,
}

impl LocalRemote {
    pub fn new(db: Arc<Mutex<Connection>>, aggregate_limit: usize) -> Self {
        Self {
            db,
            aggregate_limit,
        }
    }
}

#[async_trait]
impl RemoteGraph for LocalRemote {
    async fn apply(&self, operation: &PendingOperation) -> Result<OperationResult> {
        let db = self.db.clone();
        let operation = operation.clone();
        let limit = self.aggregate_limit;
        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|e| GraphError::internal(format!("database lock poisoned: {e}")))?;
            apply_operation(&mut conn, &operation, limit)
        })
        .await?
    }
}
