//! MCP `unlink_point_from_topic` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `unlink_point_from_topic` MCP tool.
///
/// Adds and removes are applied together or not at all.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct UpdateLinksParams {
    #[schemars(description = "Id of the point whose links change")]
    pub point_id: String,

    #[schemars(description = "Topic ids to link the point to")]
    #[serde(default)]
    pub add: Vec<String>,

    #[schemars(description = "Topic ids to unlink the point from")]
    #[serde(default)]
    pub remove: Vec<String>,
}
