//! SQL DDL for the prayer graph.
//!
//! Defines the `prayer_points`, `prayer_topics`, `graph_log`, and `schema_meta`
//! tables. Denormalized arrays (`linked_topics`, `journey`, `categories`,
//! `recipients`) are JSON text columns; embeddings are little-endian `f32` BLOBs.
//! All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// Schema version 1. Later columns are added by [`super::migrations`].
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS prayer_points (
    id TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL DEFAULT 'point' CHECK(entity_type = 'point'),
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    category TEXT,
    author_id TEXT NOT NULL,
    author_name TEXT NOT NULL DEFAULT '',
    recipients TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    linked_topics TEXT NOT NULL DEFAULT '[]',
    embedding BLOB,
    embedding_text TEXT,
    prayer_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_points_author ON prayer_points(author_id, created_at);
CREATE INDEX IF NOT EXISTS idx_points_created ON prayer_points(created_at);

CREATE TABLE IF NOT EXISTS prayer_topics (
    id TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL DEFAULT 'topic' CHECK(entity_type = 'topic'),
    title TEXT NOT NULL,
    content TEXT NOT NULL DEFAULT '',
    author_id TEXT NOT NULL,
    author_name TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    journey TEXT NOT NULL DEFAULT '[]',
    embedding BLOB,
    embedding_text TEXT,
    aggregated_embedding BLOB,
    categories TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_topics_author ON prayer_topics(author_id, created_at);

-- Audit log
CREATE TABLE IF NOT EXISTS graph_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('create','update','link','unlink','aggregate','delete')),
    entity_type TEXT NOT NULL CHECK(entity_type IN ('point','topic')),
    entity_id TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_graph_log_entity ON graph_log(entity_id);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
