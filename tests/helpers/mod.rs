#![allow(dead_code)]

use async_trait::async_trait;
use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use orison::db;
use orison::error::{GraphError, Result};
use orison::graph::aggregate::DEFAULT_RECENT_POINT_LIMIT;
use orison::graph::store::{self, NewPoint, NewTopic};
use orison::graph::types::{PrayerPoint, PrayerTopic};
use orison::sync::{LocalRemote, OperationResult, PendingOperation, RemoteGraph};

pub const OWNER: &str = "owner-1";
pub const LIMIT: usize = DEFAULT_RECENT_POINT_LIMIT;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

/// Deterministic 8-dim embedding with a spike at position `seed`.
pub fn test_embedding(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; 8];
    v[seed % 8] = 1.0;
    v
}

pub fn insert_point(
    conn: &mut Connection,
    id: &str,
    category: Option<&str>,
    embedding: Option<Vec<f32>>,
) -> PrayerPoint {
    insert_point_at(conn, id, category, embedding, "2024-05-01T08:00:00Z")
}

pub fn insert_point_at(
    conn: &mut Connection,
    id: &str,
    category: Option<&str>,
    embedding: Option<Vec<f32>>,
    created_at: &str,
) -> PrayerPoint {
    store::create_point(
        conn,
        NewPoint {
            id: Some(id.into()),
            title: format!("Prayer {id}"),
            content: "Please pray".into(),
            category: category.map(str::to_string),
            author_id: OWNER.into(),
            author_name: "Ann".into(),
            created_at: Some(created_at.into()),
            embedding,
            ..Default::default()
        },
    )
    .unwrap()
}

pub fn insert_topic(conn: &mut Connection, id: &str, embedding: Option<Vec<f32>>) -> PrayerTopic {
    store::create_topic(
        conn,
        NewTopic {
            id: Some(id.into()),
            title: format!("Topic {id}"),
            author_id: OWNER.into(),
            embedding,
            ..Default::default()
        },
        LIMIT,
    )
    .unwrap()
}

pub fn shared(conn: Connection) -> Arc<Mutex<Connection>> {
    Arc::new(Mutex::new(conn))
}

/// A [`LocalRemote`] that can be switched offline, returning `Transient`
/// errors while it is.
pub struct SwitchableRemote {
    inner: LocalRemote,
    online: AtomicBool,
    pub calls: AtomicUsize,
}

impl SwitchableRemote {
    pub fn new(db: Arc<Mutex<Connection>>, online: bool) -> Self {
        Self {
            inner: LocalRemote::new(db, LIMIT),
            online: AtomicBool::new(online),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteGraph for SwitchableRemote {
    async fn apply(&self, operation: &PendingOperation) -> Result<OperationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(GraphError::Transient("network unavailable".into()));
        }
        self.inner.apply(operation).await
    }
}
