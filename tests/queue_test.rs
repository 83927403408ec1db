mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use helpers::{insert_point, insert_topic, shared, SwitchableRemote, OWNER};
use orison::graph::link::LinkTarget;
use orison::graph::store::{self, NewPoint};
use orison::sync::{
    GraphClient, MemoryKvStore, OfflineMutationQueue, PendingAction, PendingOperation,
    PendingStore, SqliteKvStore, SyncWorker,
};
use tempfile::TempDir;

fn new_point(id: &str) -> NewPoint {
    NewPoint {
        id: Some(id.into()),
        title: format!("Prayer {id}"),
        content: "Please pray".into(),
        author_id: OWNER.into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn offline_link_is_queued_then_applied_on_reconnect() {
    let mut conn = helpers::test_db();
    insert_point(&mut conn, "p1", Some("Health"), None);
    insert_topic(&mut conn, "t1", None);
    let db = shared(conn);

    let remote = Arc::new(SwitchableRemote::new(db.clone(), false));
    let queue = Arc::new(OfflineMutationQueue::load(Arc::new(MemoryKvStore::new())));
    let client = GraphClient::new(remote.clone(), queue.clone());

    let outcome = client
        .link("p1", LinkTarget::Topic { id: "t1".into() })
        .await
        .unwrap();
    assert!(outcome.is_queued());
    assert_eq!(queue.len(), 1);

    // Still offline: the action stays queued with its error recorded.
    let report = client.sync().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.remaining, 1);
    let pending = queue.pending();
    assert_eq!(pending[0].attempts, 1);
    assert!(pending[0].last_error.as_deref().unwrap().starts_with("unavailable"));

    remote.set_online(true);
    let report = client.sync().await;
    assert_eq!(report.applied, 1);
    assert!(queue.is_empty());

    let conn = db.lock().unwrap();
    let point = store::get_point(&conn, "p1").unwrap().unwrap();
    assert_eq!(point.linked_topics, vec!["t1".to_string()]);
}

#[tokio::test]
async fn queued_actions_replay_in_order() {
    let db = shared(helpers::test_db());
    let remote = Arc::new(SwitchableRemote::new(db.clone(), false));
    let queue = Arc::new(OfflineMutationQueue::load(Arc::new(MemoryKvStore::new())));
    let client = GraphClient::new(remote.clone(), queue.clone());

    client.create_point(new_point("p1")).await.unwrap();
    client.create_point(new_point("p2")).await.unwrap();
    // p3 must not jump ahead of the pending creates once the remote is back.
    remote.set_online(true);
    let outcome = client
        .link(
            "p1",
            LinkTarget::Point {
                id: "p2".into(),
                new_topic_title: Some("Together".into()),
                new_topic_id: None,
            },
        )
        .await
        .unwrap();
    assert!(outcome.is_queued());

    let kinds: Vec<&str> = queue.pending().iter().map(|a| a.operation.kind()).collect();
    assert_eq!(kinds, vec!["createPoint", "createPoint", "linkPointToTopic"]);

    let report = client.sync().await;
    assert_eq!(report.applied, 3);
    assert!(queue.is_empty());

    let conn = db.lock().unwrap();
    let p1 = store::get_point(&conn, "p1").unwrap().unwrap();
    assert_eq!(p1.linked_topics.len(), 1);
    let topic = store::get_topic(&conn, &p1.linked_topics[0]).unwrap().unwrap();
    assert_eq!(topic.title, "Together");
}

#[tokio::test]
async fn online_mutation_applies_directly() {
    let db = shared(helpers::test_db());
    let remote = Arc::new(SwitchableRemote::new(db.clone(), true));
    let queue = Arc::new(OfflineMutationQueue::load(Arc::new(MemoryKvStore::new())));
    let client = GraphClient::new(remote, queue.clone());

    let outcome = client.create_point(new_point("p1")).await.unwrap();
    assert!(!outcome.is_queued());
    assert!(queue.is_empty());
}

#[tokio::test]
async fn permanent_errors_are_returned_not_queued() {
    let db = shared(helpers::test_db());
    let remote = Arc::new(SwitchableRemote::new(db, true));
    let queue = Arc::new(OfflineMutationQueue::load(Arc::new(MemoryKvStore::new())));
    let client = GraphClient::new(remote, queue.clone());

    let err = client
        .link("missing", LinkTarget::Topic { id: "t1".into() })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not-found");
    assert!(queue.is_empty());

    // Invalid requests never reach the remote or the queue.
    let err = client.unlink("p1", "").await.unwrap_err();
    assert_eq!(err.code(), "invalid-argument");
    assert!(queue.is_empty());
}

#[test]
fn queue_survives_restart() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("queue").join("pending.db");

    {
        let store = Arc::new(SqliteKvStore::open(&path).unwrap());
        let queue = OfflineMutationQueue::load(store);
        queue.enqueue(PendingAction::new("a1", PendingOperation::CreatePoint(new_point("p1"))));
        queue.enqueue(PendingAction::new("a2", PendingOperation::CreatePoint(new_point("p2"))));
    }

    let store = Arc::new(SqliteKvStore::open(&path).unwrap());
    let queue = OfflineMutationQueue::load(store);
    let ids: Vec<String> = queue.pending().into_iter().map(|a| a.id).collect();
    assert_eq!(ids, vec!["a1".to_string(), "a2".to_string()]);

    assert!(queue.discard("a1").is_some());
    assert!(queue.discard("a1").is_none());
    assert_eq!(queue.len(), 1);
}

#[test]
fn unavailable_storage_keeps_queue_in_memory() {
    let store = Arc::new(MemoryKvStore::new());
    store.set_available(false);
    let queue = OfflineMutationQueue::load(store.clone());

    queue.enqueue(PendingAction::new("a1", PendingOperation::CreatePoint(new_point("p1"))));
    assert_eq!(queue.len(), 1);

    // Nothing reached storage while it was down.
    store.set_available(true);
    assert!(store.get(orison::sync::queue::PENDING_ACTIONS_KEY).is_none());
    assert_eq!(queue.pending()[0].id, "a1");

    // The first write after recovery stores everything held in memory.
    queue.enqueue(PendingAction::new("a2", PendingOperation::CreatePoint(new_point("p2"))));
    let restored = OfflineMutationQueue::load(store);
    let ids: Vec<String> = restored.pending().into_iter().map(|a| a.id).collect();
    assert_eq!(ids, vec!["a1".to_string(), "a2".to_string()]);
}

#[tokio::test]
async fn rejected_replay_is_parked_and_does_not_block_new_writes() {
    let mut conn = helpers::test_db();
    insert_point(&mut conn, "p1", Some("Health"), None);
    let db = shared(conn);

    let remote = Arc::new(SwitchableRemote::new(db.clone(), false));
    let queue = Arc::new(OfflineMutationQueue::load(Arc::new(MemoryKvStore::new())));
    let client = GraphClient::new(remote.clone(), queue.clone());

    // Queued offline against a topic that never existed.
    let outcome = client
        .link("p1", LinkTarget::Topic { id: "no-such-topic".into() })
        .await
        .unwrap();
    assert!(outcome.is_queued());

    remote.set_online(true);
    let report = client.sync().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.parked, 1);
    assert_eq!(report.remaining, 0);
    let pending = queue.pending();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].parked);
    assert!(pending[0].last_error.as_deref().unwrap().starts_with("not-found"));
    assert!(!client.has_pending());

    // Permanent errors surface to the caller instead of being queued.
    let err = client
        .link("ghost", LinkTarget::Topic { id: "t9".into() })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not-found");

    // Valid writes apply directly.
    let outcome = client.create_point(new_point("p2")).await.unwrap();
    assert!(!outcome.is_queued());
    assert_eq!(queue.len(), 1);

    // Later passes leave the parked action alone.
    let calls = remote.calls.load(Ordering::SeqCst);
    let report = client.sync().await;
    assert_eq!(report.attempted, 0);
    assert_eq!(remote.calls.load(Ordering::SeqCst), calls);

    let conn = db.lock().unwrap();
    assert!(store::get_point(&conn, "p2").unwrap().is_some());
}

#[tokio::test]
async fn worker_drains_queue_when_connectivity_returns() {
    let db = shared(helpers::test_db());
    let remote = Arc::new(SwitchableRemote::new(db.clone(), false));
    let queue = Arc::new(OfflineMutationQueue::load(Arc::new(MemoryKvStore::new())));
    let client = GraphClient::new(remote.clone(), queue.clone());
    client.create_point(new_point("p1")).await.unwrap();
    assert_eq!(queue.len(), 1);

    let handle = SyncWorker::new(queue.clone(), remote.clone())
        .with_poll_interval(Duration::from_secs(3600))
        .spawn(false);
    let mut reports = handle.reports();

    remote.set_online(true);
    handle.set_online(true);

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            reports.changed().await.unwrap();
            if reports.borrow().as_ref().is_some_and(|r| r.applied == 1) {
                break;
            }
        }
    })
    .await
    .unwrap();

    assert!(queue.is_empty());
    assert!(remote.calls.load(Ordering::SeqCst) >= 2);
    handle.shutdown().await;

    let conn = db.lock().unwrap();
    assert!(store::get_point(&conn, "p1").unwrap().is_some());
}
