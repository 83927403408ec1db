//! CLI `doctor` command: database diagnostics plus offline queue status.

use anyhow::{Context, Result};

use orison::config::OrisonConfig;
use orison::db;
use orison::graph::aggregate;

/// Run database diagnostics and print a health report.
pub fn doctor(config: &OrisonConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `orison serve` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;
    let queue = super::open_queue(config)?;

    println!("Orison Health Report");
    println!("====================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!("Embedding:         {} ({})", config.embedding.provider, config.embedding.model);
    println!();
    println!("Row counts:");
    println!("  Points:          {}", report.point_count);
    println!("  Topics:          {}", report.topic_count);
    println!("  Audit log:       {}", report.log_count);
    println!();
    println!("Aggregates:");
    println!("  Dirty topics:    {}", report.dirty_topic_count);
    if report.dirty_topic_count > 0 {
        for topic in aggregate::dirty_topics(&conn)?.iter().take(10) {
            println!("    {} ({})", topic.id, topic.title);
        }
        println!("  Run `orison reconcile` to recompute them.");
    }
    println!();
    println!("Offline queue:     {}", config.resolved_queue_path().display());
    println!("  Pending actions: {}", queue.active_len());
    let failing = queue
        .pending()
        .iter()
        .filter(|a| !a.parked && a.last_error.is_some())
        .count();
    if failing > 0 {
        println!("  Failing:         {failing} (see `orison queue list`)");
    }
    let parked = queue.parked_len();
    if parked > 0 {
        println!("  Parked:          {parked} (rejected by the graph; `orison queue retry|drop <id>`)");
    }
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED");
        println!();
        println!("Recovery steps:");
        println!("  1. Stop `orison serve`.");
        println!("  2. Restore from a backup: cp backup.db {}", db_path.display());
        println!("  3. Run `orison reconcile --all` to rebuild topic aggregates.");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
