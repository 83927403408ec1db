//! MCP `create_point` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `create_point` MCP tool.
///
/// Creating with an existing `id` updates the point's fields and keeps its links.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CreatePointParams {
    #[schemars(description = "Optional id. Reusing an id updates that point without touching its links.")]
    pub id: Option<String>,

    #[schemars(description = "Short title of the prayer point")]
    pub title: String,

    #[schemars(description = "Body text of the prayer point")]
    pub content: String,

    #[schemars(description = "Optional category, e.g. 'Health', 'Family'")]
    pub category: Option<String>,

    #[schemars(description = "Author id. Defaults to the configured owner.")]
    pub author_id: Option<String>,

    #[schemars(description = "Display name of the author")]
    pub author_name: Option<String>,

    #[schemars(description = "People this point is prayed for")]
    pub recipients: Option<Vec<String>>,

    #[schemars(description = "Client creation time (RFC 3339). Defaults to now.")]
    pub created_at: Option<String>,

    #[schemars(
        description = "Precomputed embedding. When omitted, title and content are embedded by the configured provider."
    )]
    pub embedding: Option<Vec<f32>>,

    #[schemars(description = "Id of the prayer this point belongs to")]
    pub prayer_id: Option<String>,
}
