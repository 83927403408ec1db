//! CLI `sync` command: replay the offline queue against the local graph.

use anyhow::Result;

use orison::config::OrisonConfig;

pub async fn sync(config: &OrisonConfig) -> Result<()> {
    let client = super::open_client(config)?;
    if !client.has_pending() {
        println!("Nothing to sync.");
        return Ok(());
    }

    let report = client.sync().await;
    if report.skipped {
        println!("Another sync is already running.");
        return Ok(());
    }

    println!(
        "Synced {} of {} pending action(s); {} failed ({} parked), {} remaining.",
        report.applied, report.attempted, report.failed, report.parked, report.remaining
    );
    if report.failed > 0 {
        println!("Run `orison queue list` to see the errors.");
    }
    Ok(())
}
