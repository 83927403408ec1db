//! Forward-only schema upgrades for the graph database.
//!
//! `schema_meta.schema_version` records how far a file has been upgraded;
//! [`run_migrations`] walks it one step at a time to [`CURRENT_SCHEMA_VERSION`].

use rusqlite::Connection;

/// Version written by the newest migration below.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Stored schema version. An unparsable value reads as 0.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}

fn update_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
        [version.to_string()],
    )?;
    Ok(())
}

/// Apply every pending step, each in its own transaction.
pub fn run_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
    let mut version = get_schema_version(conn)?;
    tracing::debug!(schema_version = version, target = CURRENT_SCHEMA_VERSION, "checking migrations");

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        tracing::info!(from = version, to = next, "running migration");

        let tx = conn.transaction()?;
        match next {
            2 => migrate_v1_to_v2(&tx)?,
            _ => {
                tracing::error!(version = next, "unknown migration target");
                break;
            }
        }
        update_schema_version(&tx, next)?;
        tx.commit()?;

        version = next;
    }

    Ok(())
}

/// Migration v1 → v2: staleness tracking for topic aggregates.
///
/// Every existing topic starts dirty so the first reconcile sweep recomputes it.
fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "ALTER TABLE prayer_topics ADD COLUMN aggregated_at TEXT;
         ALTER TABLE prayer_topics ADD COLUMN aggregate_dirty INTEGER NOT NULL DEFAULT 1;
         CREATE INDEX IF NOT EXISTS idx_topics_dirty ON prayer_topics(aggregate_dirty, aggregated_at);",
    )
}
