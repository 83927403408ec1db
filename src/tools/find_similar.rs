//! MCP `find_similar` and `find_similar_batch` tool parameter definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use orison::graph::types::EntityType;

/// Parameters for the `find_similar` MCP tool.
///
/// Provide `query_embedding`, or `query_text` to embed with the configured provider.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct FindSimilarParams {
    #[schemars(description = "Query vector (at most 1536 dimensions). Required unless 'query_text' is provided.")]
    pub query_embedding: Option<Vec<f32>>,

    #[schemars(description = "Text to embed as the query. Required unless 'query_embedding' is provided.")]
    pub query_text: Option<String>,

    #[schemars(description = "Number of results (1-10). Defaults to 5.")]
    pub top_k: Option<usize>,

    #[schemars(description = "Id to leave out of the results, usually the entity being viewed")]
    pub exclude_id: Option<String>,

    #[schemars(description = "Whose entities to search. Defaults to the configured owner.")]
    pub owner_id: Option<String>,

    #[schemars(description = "Search 'point' (default) or 'topic' entities")]
    pub target: Option<EntityType>,
}

/// One query in a `find_similar_batch` call.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct BatchQueryParam {
    #[schemars(description = "Key for this query's results; also excluded from its own results")]
    pub id: String,

    #[schemars(description = "Query vector. Required unless 'text' is provided.")]
    pub embedding: Option<Vec<f32>>,

    #[schemars(description = "Text to embed. Required unless 'embedding' is provided.")]
    pub text: Option<String>,
}

/// Parameters for the `find_similar_batch` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct FindSimilarBatchParams {
    #[schemars(description = "Queries ranked against one shared candidate pool")]
    pub queries: Vec<BatchQueryParam>,

    #[schemars(description = "Number of results per query (1-10). Defaults to 5.")]
    pub top_k: Option<usize>,

    #[schemars(description = "Whose entities to search. Defaults to the configured owner.")]
    pub owner_id: Option<String>,

    #[schemars(description = "Search 'point' (default) or 'topic' entities")]
    pub target: Option<EntityType>,
}
