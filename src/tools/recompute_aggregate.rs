//! MCP `recompute_topic_aggregate` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RecomputeAggregateParams {
    #[schemars(description = "Id of the topic whose aggregated embedding and categories to rebuild")]
    pub topic_id: String,
}
