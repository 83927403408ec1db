pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// How long a writer waits on a locked database before failing as transient.
pub const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Open (or create) the graph database at the given path with the schema
/// initialized and migrated.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    // WAL lets readers proceed while a link transaction is writing
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&mut conn).context("failed to run migrations")?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open a migrated in-memory database. Used by tests and dry runs.
pub fn open_memory_database() -> Result<Connection> {
    let mut conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&mut conn).context("failed to run migrations")?;
    Ok(conn)
}

/// Snapshot of database health for the CLI and startup logging.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub integrity_ok: bool,
    pub schema_version: u32,
    pub point_count: i64,
    pub topic_count: i64,
    pub dirty_topic_count: i64,
    pub log_count: i64,
}

pub fn check_database_health(conn: &Connection) -> Result<HealthReport> {
    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
    let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };

    Ok(HealthReport {
        integrity_ok: integrity == "ok",
        schema_version: migrations::get_schema_version(conn)?,
        point_count: count("SELECT COUNT(*) FROM prayer_points")?,
        topic_count: count("SELECT COUNT(*) FROM prayer_topics")?,
        dirty_topic_count: count("SELECT COUNT(*) FROM prayer_topics WHERE aggregate_dirty = 1")?,
        log_count: count("SELECT COUNT(*) FROM graph_log")?,
    })
}
