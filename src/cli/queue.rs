//! CLI `queue` commands: list, retry, and drop pending offline actions.

use anyhow::{bail, Result};

use orison::config::OrisonConfig;

pub fn list(config: &OrisonConfig) -> Result<()> {
    let queue = super::open_queue(config)?;
    let pending = queue.pending();
    if pending.is_empty() {
        println!("No pending actions.");
        return Ok(());
    }

    println!("{} pending action(s), oldest first:\n", pending.len());
    for (i, action) in pending.iter().enumerate() {
        println!(
            "  {}. {} [{}] queued {} (attempts: {}){}",
            i + 1,
            action.id,
            action.operation.kind(),
            action.enqueued_at,
            action.attempts,
            if action.parked { " PARKED" } else { "" },
        );
        if let Some(ref err) = action.last_error {
            println!("     last error: {err}");
        }
    }
    Ok(())
}

/// Put a parked action back in line for the next sync.
pub fn retry(config: &OrisonConfig, id: &str) -> Result<()> {
    let queue = super::open_queue(config)?;
    if !queue.retry(id) {
        bail!("no parked action with id {id}");
    }
    println!("Requeued {id}. Run `orison sync` to replay it.");
    Ok(())
}

/// Remove one action without applying it.
pub fn drop(config: &OrisonConfig, id: &str) -> Result<()> {
    let queue = super::open_queue(config)?;
    match queue.discard(id) {
        Some(action) => {
            println!("Dropped {} [{}].", action.id, action.operation.kind());
            Ok(())
        }
        None => bail!("no pending action with id {id}"),
    }
}
