//! Background task that drains the queue.
//!
//! A pass starts when connectivity flips to online, when someone calls
//! [`SyncHandle::trigger`] or notifies [`SyncHandle::notifier`], or on the
//! optional poll interval while online.
//! Passes never overlap: the queue's own single-flight flag turns a
//! concurrent trigger into a no-op.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use crate::sync::queue::{OfflineMutationQueue, SyncReport};
use crate::sync::remote::RemoteGraph;

pub struct SyncWorker {
    queue: Arc<OfflineMutationQueue>,
    remote: Arc<dyn RemoteGraph>,
    poll_interval: Option<Duration>,
}

/// Controls a running [`SyncWorker`].
pub struct SyncHandle {
    connectivity: watch::Sender<bool>,
    trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    reports: watch::Receiver<Option<SyncReport>>,
    task: JoinHandle<()>,
}

impl SyncWorker {
    pub fn new(queue: Arc<OfflineMutationQueue>, remote: Arc<dyn RemoteGraph>) -> Self {
        Self {
            queue,
            remote,
            poll_interval: None,
        }
    }

    /// Also sync every `interval` while online. Zero disables polling.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    pub fn spawn(self, online: bool) -> SyncHandle {
        let (connectivity, connectivity_rx) = watch::channel(online);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (report_tx, reports) = watch::channel(None);
        let trigger = Arc::new(Notify::new());

        let task = tokio::spawn(self.run(connectivity_rx, trigger.clone(), shutdown_rx, report_tx));
        tracing::info!(online, "sync worker started");

        SyncHandle {
            connectivity,
            trigger,
            shutdown,
            reports,
            task,
        }
    }

    async fn run(
        self,
        mut connectivity: watch::Receiver<bool>,
        trigger: Arc<Notify>,
        mut shutdown: watch::Receiver<bool>,
        reports: watch::Sender<Option<SyncReport>>,
    ) {
        let mut poll = self.poll_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        // Drain anything restored from storage if we start online.
        if *connectivity.borrow_and_update() {
            self.pass(&reports, "startup").await;
        }

        loop {
            tokio::select! {
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *connectivity.borrow_and_update();
                    tracing::info!(online, "connectivity changed");
                    if online {
                        self.pass(&reports, "reconnected").await;
                    }
                }
                _ = trigger.notified() => {
                    self.pass(&reports, "manual").await;
                }
                _ = tick(&mut poll) => {
                    if *connectivity.borrow() {
                        self.pass(&reports, "poll").await;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("sync worker stopped");
    }

    async fn pass(&self, reports: &watch::Sender<Option<SyncReport>>, reason: &str) {
        let pending = self.queue.active_len();
        if pending == 0 {
            return;
        }
        tracing::debug!(reason, pending, "sync pass starting");
        let report = self.queue.sync(self.remote.as_ref()).await;
        reports.send_replace(Some(report));
    }
}

async fn tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl SyncHandle {
    pub fn set_online(&self, online: bool) {
        self.connectivity.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }

    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Shared wake-up used by [`crate::sync::GraphClient::with_sync_trigger`].
    pub fn notifier(&self) -> Arc<Notify> {
        self.trigger.clone()
    }

    /// Receiver for the report of the most recent pass.
    pub fn reports(&self) -> watch::Receiver<Option<SyncReport>> {
        self.reports.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "sync worker ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GraphError, Result};
    use crate::sync::client::GraphClient;
    use crate::sync::queue::{PendingAction, PendingOperation, RecomputeRequest};
    use crate::sync::remote::OperationResult;
    use crate::sync::storage::MemoryKvStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn aggregated(op: &PendingOperation) -> Result<OperationResult> {
        let PendingOperation::RecomputeTopicAggregate(r) = op else {
            return Err(GraphError::internal("unexpected"));
        };
        Ok(OperationResult::Aggregate(crate::graph::aggregate::AggregateResult {
            topic_id: r.topic_id.clone(),
            embedding: None,
            categories: vec![],
            source_count: 0,
            point_count: 0,
        }))
    }

    struct Gate(AtomicBool);

    #[async_trait]
    impl RemoteGraph for Gate {
        async fn apply(&self, op: &PendingOperation) -> Result<OperationResult> {
            if !self.0.load(Ordering::SeqCst) {
                return Err(GraphError::Transient("offline".into()));
            }
            aggregated(op)
        }
    }

    /// Busy for the first `n` calls, then fine.
    struct BusyFor(AtomicUsize);

    #[async_trait]
    impl RemoteGraph for BusyFor {
        async fn apply(&self, op: &PendingOperation) -> Result<OperationResult> {
            let left = self.0.load(Ordering::SeqCst);
            if left > 0 {
                self.0.store(left - 1, Ordering::SeqCst);
                return Err(GraphError::Transient("database is locked".into()));
            }
            aggregated(op)
        }
    }

    async fn next_report(rx: &mut watch::Receiver<Option<SyncReport>>) -> SyncReport {
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("no sync pass within timeout")
            .unwrap();
        rx.borrow_and_update().clone().unwrap()
    }

    #[tokio::test]
    async fn test_reconnect_drains_queue() {
        let queue = Arc::new(OfflineMutationQueue::load(Arc::new(MemoryKvStore::new())));
        queue.enqueue(PendingAction::new(
            "1",
            PendingOperation::RecomputeTopicAggregate(RecomputeRequest { topic_id: "t1".into() }),
        ));
        let remote = Arc::new(Gate(AtomicBool::new(false)));
        let handle = SyncWorker::new(queue.clone(), remote.clone()).spawn(false);
        let mut reports = handle.reports();

        handle.trigger();
        let report = next_report(&mut reports).await;
        assert_eq!(report.failed, 1);
        assert_eq!(queue.len(), 1);

        remote.0.store(true, Ordering::SeqCst);
        handle.set_online(true);
        let report = next_report(&mut reports).await;
        assert_eq!(report.applied, 1);
        assert!(queue.is_empty());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_queued_mutation_wakes_worker_without_reconnect() {
        let queue = Arc::new(OfflineMutationQueue::load(Arc::new(MemoryKvStore::new())));
        let remote = Arc::new(BusyFor(AtomicUsize::new(1)));
        // Online from the start and no polling: only the client can start a pass
        let handle = SyncWorker::new(queue.clone(), remote.clone()).spawn(true);
        let mut reports = handle.reports();
        let client = GraphClient::new(remote, queue.clone()).with_sync_trigger(handle.notifier());

        let outcome = client.recompute("t1").await.unwrap();
        assert!(outcome.is_queued());

        let report = next_report(&mut reports).await;
        assert_eq!(report.applied, 1);
        assert!(queue.is_empty());

        handle.shutdown().await;
    }
}
