//! MCP `inspect_entity` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use orison::graph::types::EntityType;

/// Parameters for the `inspect_entity` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct InspectEntityParams {
    #[schemars(description = "'point' or 'topic'")]
    pub entity_type: EntityType,

    #[schemars(description = "Id of the entity")]
    pub id: String,

    #[schemars(description = "Include the embedding vectors in the response. Defaults to false.")]
    pub include_embeddings: Option<bool>,
}
