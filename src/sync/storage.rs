//! Key-value persistence for the pending-action list.
//!
//! A [`PendingStore`] never fails outward. A storage fault is logged at `warn`
//! and the queue carries on in memory with degraded durability.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::graph::types::now_timestamp;

pub trait PendingStore: Send + Sync {
    /// Read a value, telling an absent key apart from an unreachable store.
    fn try_get(&self, key: &str) -> Result<Option<String>>;

    fn get(&self, key: &str) -> Option<String> {
        self.try_get(key).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "pending store read failed");
            None
        })
    }

    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Durable store backed by a small SQLite file of its own.
pub struct SqliteKvStore {
    conn: Mutex<Connection>,
}

impl SqliteKvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open queue store: {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(crate::db::BUSY_TIMEOUT)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .context("failed to create kv table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PendingStore for SqliteKvStore {
    fn try_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock();
        conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
            .context("failed to read pending store")
    }

    fn set(&self, key: &str, value: &str) {
        let conn = self.lock();
        if let Err(e) = conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now_timestamp()],
        ) {
            tracing::warn!(key, error = %e, "pending store write failed, queue is not durable");
        }
    }

    fn remove(&self, key: &str) {
        let conn = self.lock();
        if let Err(e) = conn.execute("DELETE FROM kv WHERE key = ?1", params![key]) {
            tracing::warn!(key, error = %e, "pending store delete failed");
        }
    }
}

/// In-memory store. [`MemoryKvStore::set_available`] simulates a storage
/// outage: while unavailable, reads return nothing and writes are dropped.
#[derive(Default)]
pub struct MemoryKvStore {
    map: Mutex<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn map(&self) -> Option<MutexGuard<'_, HashMap<String, String>>> {
        if self.unavailable.load(Ordering::SeqCst) {
            tracing::warn!("pending store unavailable");
            return None;
        }
        Some(self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

impl PendingStore for MemoryKvStore {
    fn try_get(&self, key: &str) -> Result<Option<String>> {
        let map = self.map().context("pending store unavailable")?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) {
        if let Some(mut map) = self.map() {
            map.insert(key.to_string(), value.to_string());
        }
    }

    fn remove(&self, key: &str) {
        if let Some(mut map) = self.map() {
            map.remove(key);
        }
    }
}
