//! MCP `link_point_to_topic` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `link_point_to_topic` MCP tool.
///
/// Provide exactly one of `topic_id` (link to an existing topic) or
/// `other_point_id` (group two points under a new topic).
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct LinkPointParams {
    #[schemars(description = "Id of the point to link")]
    pub point_id: String,

    #[schemars(description = "Existing topic to link the point to. Required unless 'other_point_id' is provided.")]
    pub topic_id: Option<String>,

    #[schemars(
        description = "Another point to group with this one under a newly created topic. Required unless 'topic_id' is provided."
    )]
    pub other_point_id: Option<String>,

    #[schemars(description = "Title for the new topic when linking two points. Defaults to the first point's title.")]
    pub new_topic_title: Option<String>,
}
