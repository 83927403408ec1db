pub mod doctor;
pub mod inspect;
pub mod link;
pub mod queue;
pub mod re_embed;
pub mod reconcile;
pub mod search;
pub mod sync;

use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};

use orison::config::OrisonConfig;
use orison::db;
use orison::sync::{GraphClient, LocalRemote, MutationOutcome, OfflineMutationQueue, SqliteKvStore};

/// Open the graph and the offline queue the way `serve` does, for one-shot
/// commands that mutate.
pub fn open_client(config: &OrisonConfig) -> Result<GraphClient> {
    let conn = db::open_database(config.resolved_db_path()).context("failed to open database")?;
    let db = Arc::new(Mutex::new(conn));
    let queue = open_queue(config)?;
    let remote = Arc::new(LocalRemote::new(db, config.aggregation.recent_point_limit));
    Ok(GraphClient::new(remote, queue))
}

pub fn open_queue(config: &OrisonConfig) -> Result<Arc<OfflineMutationQueue>> {
    let path = config.resolved_queue_path();
    let store = SqliteKvStore::open(&path)
        .with_context(|| format!("failed to open queue at {}", path.display()))?;
    Ok(Arc::new(OfflineMutationQueue::load(Arc::new(store))))
}

pub fn print_outcome(what: &str, outcome: &MutationOutcome) -> Result<()> {
    match outcome {
        MutationOutcome::Applied { result } => {
            println!("{what}: applied");
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        MutationOutcome::Queued { action_id } => {
            println!("{what}: database busy, queued as {action_id}");
            println!("Run `orison sync` to apply pending actions.");
        }
    }
    Ok(())
}
