//! MCP `delete_entity` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use orison::graph::types::EntityType;

/// Parameters for the `delete_entity` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DeleteEntityParams {
    #[schemars(description = "'point' or 'topic'")]
    pub entity_type: EntityType,

    #[schemars(description = "Id of the entity to delete. Deleting a missing entity succeeds.")]
    pub id: String,
}
