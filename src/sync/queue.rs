//! Durable FIFO of mutations waiting for the graph to become reachable.
//!
//! The whole list is persisted under one key after every change. An action
//! leaves the list only once the remote has confirmed it, so a crash between
//! apply and dequeue replays the action; every operation is idempotent, so the
//! replay is harmless.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{GraphError, Result};
use crate::graph::editor::EntityPatch;
use crate::graph::link::{LinkRequest, LinkTarget, LinkUpdateRequest};
use crate::graph::store::{NewPoint, NewTopic};
use crate::graph::types::{now_timestamp, EntityType};
use crate::sync::remote::RemoteGraph;
use crate::sync::storage::PendingStore;

/// Storage key holding the serialized pending-action list.
pub const PENDING_ACTIONS_KEY: &str = "pending_actions";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub entity_type: EntityType,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub entity_type: EntityType,
    pub id: String,
    pub patch: EntityPatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeRequest {
    pub topic_id: String,
}

/// A graph mutation in its replayable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum PendingOperation {
    CreatePoint(NewPoint),
    CreateTopic(NewTopic),
    LinkPointToTopic(LinkRequest),
    UpdatePointLinks(LinkUpdateRequest),
    DeleteEntity(DeleteRequest),
    UpdateEntity(UpdateRequest),
    RecomputeTopicAggregate(RecomputeRequest),
}

impl PendingOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreatePoint(_) => "createPoint",
            Self::CreateTopic(_) => "createTopic",
            Self::LinkPointToTopic(_) => "linkPointToTopic",
            Self::UpdatePointLinks(_) => "updatePointLinks",
            Self::DeleteEntity(_) => "deleteEntity",
            Self::UpdateEntity(_) => "updateEntity",
            Self::RecomputeTopicAggregate(_) => "recomputeTopicAggregate",
        }
    }

    /// Fill in ids the remote would otherwise generate, so a replay targets
    /// the same documents as the first attempt.
    pub fn with_assigned_ids(mut self) -> Self {
        fn assign(id: &mut Option<String>) {
            if id.as_deref().map_or(true, |s| s.trim().is_empty()) {
                *id = Some(uuid::Uuid::now_v7().to_string());
            }
        }
        match &mut self {
            Self::CreatePoint(p) => assign(&mut p.id),
            Self::CreateTopic(t) => assign(&mut t.id),
            Self::LinkPointToTopic(LinkRequest {
                target: LinkTarget::Point { new_topic_id, .. },
                ..
            }) => assign(new_topic_id),
            _ => {}
        }
        self
    }

    /// Reject operations that could never succeed, before they reach the queue.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::CreatePoint(p) => p.validate(),
            Self::CreateTopic(t) => t.validate(),
            Self::LinkPointToTopic(r) => r.validate(),
            Self::UpdatePointLinks(r) => r.validate(),
            Self::DeleteEntity(r) => require_id(&r.id, r.entity_type),
            Self::UpdateEntity(r) => {
                require_id(&r.id, r.entity_type)?;
                r.patch.validate()
            }
            Self::RecomputeTopicAggregate(r) => require_id(&r.topic_id, EntityType::Topic),
        }
    }
}

fn require_id(id: &str, entity_type: EntityType) -> Result<()> {
    if id.trim().is_empty() {
        return Err(GraphError::invalid(format!("{entity_type} id is required")));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    pub id: String,
    pub operation: PendingOperation,
    pub enqueued_at: String,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Set when a replay failed with a non-transient error. Parked actions
    /// are not replayed and do not hold back new mutations.
    #[serde(default)]
    pub parked: bool,
}

impl PendingAction {
    pub fn new(id: impl Into<String>, operation: PendingOperation) -> Self {
        Self {
            id: id.into(),
            operation,
            enqueued_at: now_timestamp(),
            attempts: 0,
            last_error: None,
            parked: false,
        }
    }
}

/// Outcome of one [`OfflineMutationQueue::sync`] pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// Another pass was already running; nothing was attempted.
    pub skipped: bool,
    pub attempted: usize,
    pub applied: usize,
    pub failed: usize,
    /// Failures in this pass that were permanent and moved the action aside.
    pub parked: usize,
    /// Actions still waiting for replay. Parked actions are not counted.
    pub remaining: usize,
}

pub struct OfflineMutationQueue {
    store: Arc<dyn PendingStore>,
    actions: Mutex<Vec<PendingAction>>,
    is_syncing: AtomicBool,
    /// False while the stored list could not be read at load time.
    restored: AtomicBool,
}

impl OfflineMutationQueue {
    /// Restore the queue from storage. An unreadable list is logged and
    /// replaced with an empty one. If the store is unreachable, the stored
    /// list is merged in on the first write after it comes back.
    pub fn load(store: Arc<dyn PendingStore>) -> Self {
        let (actions, restored) = match store.try_get(PENDING_ACTIONS_KEY) {
            Ok(raw) => (parse_list(raw), true),
            Err(e) => {
                tracing::warn!(error = %e, "pending store unreadable at startup, starting in memory");
                (Vec::new(), false)
            }
        };
        if !actions.is_empty() {
            tracing::info!(count = actions.len(), "restored pending actions");
        }
        Self {
            store,
            actions: Mutex::new(actions),
            is_syncing: AtomicBool::new(false),
            restored: AtomicBool::new(restored),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PendingAction>> {
        self.actions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, actions: &mut Vec<PendingAction>) {
        if !self.restored.load(Ordering::SeqCst) {
            match self.store.try_get(PENDING_ACTIONS_KEY) {
                Ok(raw) => {
                    merge_stored(actions, parse_list(raw));
                    self.restored.store(true, Ordering::SeqCst);
                }
                Err(e) => {
                    // Writing now would replace a list we have never seen.
                    tracing::warn!(error = %e, "pending store still unreadable, write skipped");
                    return;
                }
            }
        }
        if actions.is_empty() {
            self.store.remove(PENDING_ACTIONS_KEY);
            return;
        }
        match serde_json::to_string(&*actions) {
            Ok(json) => self.store.set(PENDING_ACTIONS_KEY, &json),
            Err(e) => tracing::warn!(error = %e, "failed to serialize pending actions"),
        }
    }

    /// Append an action. An action with the same id is replaced in place.
    pub fn enqueue(&self, action: PendingAction) {
        let mut actions = self.lock();
        tracing::debug!(id = %action.id, kind = action.operation.kind(), "enqueue pending action");
        match actions.iter_mut().find(|a| a.id == action.id) {
            Some(existing) => *existing = action,
            None => actions.push(action),
        }
        self.persist(&mut actions);
    }

    /// Remove an action after its effect was confirmed. Returns whether it was present.
    pub fn dequeue(&self, id: &str) -> bool {
        let mut actions = self.lock();
        let before = actions.len();
        actions.retain(|a| a.id != id);
        let removed = actions.len() != before;
        if removed {
            self.persist(&mut actions);
        }
        removed
    }

    /// Operator removal of an action that will never succeed.
    pub fn discard(&self, id: &str) -> Option<PendingAction> {
        let mut actions = self.lock();
        let idx = actions.iter().position(|a| a.id == id)?;
        let action = actions.remove(idx);
        self.persist(&mut actions);
        tracing::warn!(
            id = %action.id,
            kind = action.operation.kind(),
            attempts = action.attempts,
            "pending action discarded without being applied"
        );
        Some(action)
    }

    /// Put a parked action back in line for the next sync pass. Returns
    /// whether a parked action with this id existed.
    pub fn retry(&self, id: &str) -> bool {
        let mut actions = self.lock();
        let Some(action) = actions.iter_mut().find(|a| a.id == id && a.parked) else {
            return false;
        };
        action.parked = false;
        tracing::info!(id = %action.id, kind = action.operation.kind(), "parked action requeued");
        self.persist(&mut actions);
        true
    }

    /// Snapshot in FIFO order, parked actions included.
    pub fn pending(&self) -> Vec<PendingAction> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of actions a sync pass would replay.
    pub fn active_len(&self) -> usize {
        self.lock().iter().filter(|a| !a.parked).count()
    }

    pub fn has_active(&self) -> bool {
        self.lock().iter().any(|a| !a.parked)
    }

    pub fn parked_len(&self) -> usize {
        self.lock().iter().filter(|a| a.parked).count()
    }

    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::SeqCst)
    }

    /// Replay every active action once, in order. Only one pass runs at a
    /// time; a concurrent call returns a skipped report immediately.
    ///
    /// A transient failure leaves the action in line for the next pass. Any
    /// other failure parks it until an operator retries or discards it.
    pub async fn sync(&self, remote: &dyn RemoteGraph) -> SyncReport {
        let Some(_guard) = SyncGuard::acquire(&self.is_syncing) else {
            tracing::debug!("sync already in progress");
            return SyncReport {
                skipped: true,
                remaining: self.active_len(),
                ..Default::default()
            };
        };

        let snapshot: Vec<PendingAction> =
            self.pending().into_iter().filter(|a| !a.parked).collect();
        let mut report = SyncReport {
            attempted: snapshot.len(),
            ..Default::default()
        };

        for action in snapshot {
            match remote.apply(&action.operation).await {
                Ok(_) => {
                    self.confirm(&action);
                    report.applied += 1;
                    tracing::debug!(id = %action.id, kind = action.operation.kind(), "pending action applied");
                }
                Err(e) => {
                    let park = !e.is_transient();
                    self.record_failure(&action.id, &e, park);
                    report.failed += 1;
                    if park {
                        report.parked += 1;
                        tracing::warn!(
                            id = %action.id,
                            kind = action.operation.kind(),
                            error = %e,
                            "pending action rejected, parked"
                        );
                    } else {
                        tracing::warn!(
                            id = %action.id,
                            kind = action.operation.kind(),
                            error = %e,
                            "pending action failed, will retry"
                        );
                    }
                }
            }
        }

        report.remaining = self.active_len();
        if report.attempted > 0 {
            tracing::info!(
                applied = report.applied,
                failed = report.failed,
                parked = report.parked,
                remaining = report.remaining,
                "sync pass finished"
            );
        }
        report
    }

    /// Dequeue an applied action unless it was replaced while it was in flight.
    fn confirm(&self, applied: &PendingAction) {
        let mut actions = self.lock();
        let before = actions.len();
        actions.retain(|a| !(a.id == applied.id && a.operation == applied.operation));
        if actions.len() != before {
            self.persist(&mut actions);
        }
    }

    fn record_failure(&self, id: &str, error: &GraphError, park: bool) {
        let mut actions = self.lock();
        if let Some(action) = actions.iter_mut().find(|a| a.id == id) {
            action.attempts += 1;
            action.last_error = Some(error.to_wire());
            action.parked = park;
            self.persist(&mut actions);
        }
    }
}

fn parse_list(raw: Option<String>) -> Vec<PendingAction> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "discarding unreadable pending action list");
        Vec::new()
    })
}

/// Stored actions are older than anything queued in memory since startup,
/// so they go first. Ids already in memory keep the in-memory copy.
fn merge_stored(actions: &mut Vec<PendingAction>, stored: Vec<PendingAction>) {
    if stored.is_empty() {
        return;
    }
    let mut merged: Vec<PendingAction> = stored
        .into_iter()
        .filter(|s| !actions.iter().any(|a| a.id == s.id))
        .collect();
    tracing::warn!(count = merged.len(), "merged pending actions stored before an outage");
    merged.append(actions);
    *actions = merged;
}

/// Holds the single-flight flag for the duration of a sync pass.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
