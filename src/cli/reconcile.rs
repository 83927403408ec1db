//! CLI `reconcile` command: recompute dirty or stale topic aggregates.

use anyhow::{Context, Result};

use orison::config::OrisonConfig;
use orison::graph::aggregate;

const MAX_TOPICS: usize = 100_000;

/// With `all`, every topic is recomputed regardless of age.
pub fn reconcile(config: &OrisonConfig, all: bool) -> Result<()> {
    let mut conn = orison::db::open_database(config.resolved_db_path())
        .context("failed to open database")?;

    let stale_after = if all {
        chrono::Duration::zero()
    } else {
        chrono::Duration::hours(config.aggregation.stale_after_hours as i64)
    };

    let report = aggregate::reconcile_stale_aggregates(
        &mut conn,
        stale_after,
        MAX_TOPICS,
        config.aggregation.recent_point_limit,
    )?;

    if report.examined == 0 {
        println!("All topic aggregates are current.");
    } else {
        println!(
            "Recomputed {} of {} topic aggregate(s); {} failed.",
            report.recomputed, report.examined, report.failed
        );
    }
    Ok(())
}
