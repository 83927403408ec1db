//! MCP `update_entity` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use orison::graph::editor::EntityPatch;
use orison::graph::types::EntityType;

/// Parameters for the `update_entity` MCP tool.
///
/// Each patch field is `{"op": "set", "value": ...}`, `{"op": "clear"}`, or
/// omitted to leave it unchanged.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct UpdateEntityParams {
    #[schemars(description = "'point' or 'topic'")]
    pub entity_type: EntityType,

    #[schemars(description = "Id of the entity to update")]
    pub id: String,

    #[schemars(
        description = "Field updates. Each field is {\"op\": \"set\", \"value\": ...} or {\"op\": \"clear\"}; omit to leave unchanged. Title and content cannot be cleared."
    )]
    pub patch: EntityPatch,

    #[schemars(
        description = "Re-embed the entity when its title or content changes and no embedding is given. Defaults to true."
    )]
    pub reembed: Option<bool>,
}
