//! MCP `sync_queue` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `sync_queue` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SyncQueueParams {
    #[schemars(description = "Replay pending actions now instead of only reporting them. Defaults to false.")]
    pub run: Option<bool>,
}
