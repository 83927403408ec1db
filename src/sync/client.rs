//! Foreground entry point for mutations.
//!
//! [`GraphClient::submit`] tries the remote first. A transient failure turns
//! the mutation into a queued action and the caller gets
//! [`MutationOutcome::Queued`] instead of an error; validation and
//! authorization errors are returned as-is and never queued. Each queued
//! action wakes the sync worker, if one is attached.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::Result;
use crate::graph::editor::EntityPatch;
use crate::graph::link::{LinkRequest, LinkTarget, LinkUpdateRequest};
use crate::graph::store::{NewPoint, NewTopic};
use crate::graph::types::EntityType;
use crate::sync::queue::{
    DeleteRequest, OfflineMutationQueue, PendingAction, PendingOperation, RecomputeRequest,
    SyncReport, UpdateRequest,
};
use crate::sync::remote::{OperationResult, RemoteGraph};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum MutationOutcome {
    Applied { result: OperationResult },
    /// Stored for later replay; the caller may show its optimistic copy.
    #[serde(rename_all = "camelCase")]
    Queued { action_id: String },
}

impl MutationOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }
}

#[derive(Clone)]
pub struct GraphClient {
    remote: Arc<dyn RemoteGraph>,
    queue: Arc<OfflineMutationQueue>,
    sync_trigger: Option<Arc<Notify>>,
}

impl GraphClient {
    pub fn new(remote: Arc<dyn RemoteGraph>, queue: Arc<OfflineMutationQueue>) -> Self {
        Self {
            remote,
            queue,
            sync_trigger: None,
        }
    }

    /// Notify `trigger` whenever a mutation is queued. See
    /// [`crate::sync::SyncHandle::notifier`].
    pub fn with_sync_trigger(mut self, trigger: Arc<Notify>) -> Self {
        self.sync_trigger = Some(trigger);
        self
    }

    pub fn queue(&self) -> &Arc<OfflineMutationQueue> {
        &self.queue
    }

    /// True while any mutation is waiting to reach the graph. Parked actions
    /// do not count; they wait for an operator, not for connectivity.
    pub fn has_pending(&self) -> bool {
        self.queue.has_active()
    }

    pub fn has_parked(&self) -> bool {
        self.queue.parked_len() > 0
    }

    /// Apply a mutation, or queue it when the graph is unreachable.
    ///
    /// While older actions are waiting for replay, new ones go straight to the
    /// back of the queue so they replay after the mutations they may depend on.
    pub async fn submit(&self, operation: PendingOperation) -> Result<MutationOutcome> {
        let operation = operation.with_assigned_ids();
        operation.validate()?;

        if self.has_pending() {
            return Ok(self.enqueue(operation, "older actions pending"));
        }

        match self.remote.apply(&operation).await {
            Ok(result) => Ok(MutationOutcome::Applied { result }),
            Err(e) if e.is_transient() => Ok(self.enqueue(operation, &e.to_string())),
            Err(e) => Err(e),
        }
    }

    fn enqueue(&self, operation: PendingOperation, reason: &str) -> MutationOutcome {
        let action = PendingAction::new(uuid::Uuid::now_v7().to_string(), operation);
        let action_id = action.id.clone();
        tracing::info!(
            id = %action_id,
            kind = action.operation.kind(),
            reason,
            "mutation queued for later sync"
        );
        self.queue.enqueue(action);
        if let Some(trigger) = &self.sync_trigger {
            trigger.notify_one();
        }
        MutationOutcome::Queued { action_id }
    }

    /// Replay queued actions now.
    pub async fn sync(&self) -> SyncReport {
        self.queue.sync(self.remote.as_ref()).await
    }

    pub async fn create_point(&self, point: NewPoint) -> Result<MutationOutcome> {
        self.submit(PendingOperation::CreatePoint(point)).await
    }

    pub async fn create_topic(&self, topic: NewTopic) -> Result<MutationOutcome> {
        self.submit(PendingOperation::CreateTopic(topic)).await
    }

    pub async fn link(&self, point_id: &str, target: LinkTarget) -> Result<MutationOutcome> {
        self.submit(PendingOperation::LinkPointToTopic(LinkRequest {
            point_id: point_id.to_string(),
            target,
        }))
        .await
    }

    pub async fn unlink(&self, point_id: &str, topic_id: &str) -> Result<MutationOutcome> {
        self.update_links(point_id, vec![], vec![topic_id.to_string()])
            .await
    }

    pub async fn update_links(
        &self,
        point_id: &str,
        add: Vec<String>,
        remove: Vec<String>,
    ) -> Result<MutationOutcome> {
        self.submit(PendingOperation::UpdatePointLinks(LinkUpdateRequest {
            point_id: point_id.to_string(),
            add,
            remove,
        }))
        .await
    }

    pub async fn update(
        &self,
        entity_type: EntityType,
        id: &str,
        patch: EntityPatch,
    ) -> Result<MutationOutcome> {
        self.submit(PendingOperation::UpdateEntity(UpdateRequest {
            entity_type,
            id: id.to_string(),
            patch,
        }))
        .await
    }

    pub async fn delete(&self, entity_type: EntityType, id: &str) -> Result<MutationOutcome> {
        self.submit(PendingOperation::DeleteEntity(DeleteRequest {
            entity_type,
            id: id.to_string(),
        }))
        .await
    }

    pub async fn recompute(&self, topic_id: &str) -> Result<MutationOutcome> {
        self.submit(PendingOperation::RecomputeTopicAggregate(RecomputeRequest {
            topic_id: topic_id.to_string(),
        }))
        .await
    }
}
