//! MCP `create_topic` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `create_topic` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CreateTopicParams {
    #[schemars(description = "Optional id. Reusing an id updates that topic without touching its journey.")]
    pub id: Option<String>,

    #[schemars(description = "Topic title")]
    pub title: String,

    #[schemars(description = "Optional description")]
    pub content: Option<String>,

    #[schemars(description = "Author id. Defaults to the configured owner.")]
    pub author_id: Option<String>,

    #[schemars(description = "Display name of the author")]
    pub author_name: Option<String>,

    #[schemars(description = "The topic's own embedding. When omitted the title and description are embedded.")]
    pub embedding: Option<Vec<f32>>,
}
