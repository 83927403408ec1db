pub mod create_point;
pub mod create_topic;
pub mod delete_entity;
pub mod find_similar;
pub mod inspect_entity;
pub mod link_point;
pub mod recompute_aggregate;
pub mod sync_queue;
pub mod update_entity;
pub mod update_links;

use create_point::CreatePointParams;
use create_topic::CreateTopicParams;
use delete_entity::DeleteEntityParams;
use find_similar::{FindSimilarBatchParams, FindSimilarParams};
use inspect_entity::InspectEntityParams;
use link_point::LinkPointParams;
use recompute_aggregate::RecomputeAggregateParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use sync_queue::SyncQueueParams;
use update_entity::UpdateEntityParams;
use update_links::UpdateLinksParams;

use orison::config::OrisonConfig;
use orison::embedding::{embedding_text, EmbeddingProvider};
use orison::error::GraphError;
use orison::graph::link::LinkTarget;
use orison::graph::search::{self, BatchQuery, FindSimilarBatchRequest, FindSimilarRequest, SearchLimits};
use orison::graph::store::{self, NewPoint, NewTopic};
use orison::graph::types::{EntityType, FieldUpdate};
use orison::sync::{GraphClient, MutationOutcome};

/// The Orison MCP tool handler. Mutations go through the [`GraphClient`] so a
/// busy database queues them instead of failing; reads hit the database
/// directly.
#[derive(Clone)]
pub struct OrisonTools {
    tool_router: ToolRouter<Self>,
    db: Arc<Mutex<Connection>>,
    client: GraphClient,
    embedding: Arc<dyn EmbeddingProvider>,
    config: Arc<OrisonConfig>,
}

#[tool_router]
impl OrisonTools {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        client: GraphClient,
        embedding: Arc<dyn EmbeddingProvider>,
        config: Arc<OrisonConfig>,
    ) -> Self {
        Self {
            tool_router: Self::tool_router(),
            db,
            client,
            embedding,
            config,
        }
    }

    /// Create (or update by id) a prayer point.
    #[tool(description = "Create a prayer point. Reusing an id updates the point and keeps its topic links. The text is embedded automatically unless an embedding is given.")]
    async fn create_point(
        &self,
        Parameters(params): Parameters<CreatePointParams>,
    ) -> Result<String, String> {
        let author_id = self.owner(params.author_id.as_deref())?;
        tracing::info!(author = %author_id, title_len = params.title.len(), "create_point called");

        let (embedding, text) = match params.embedding {
            Some(e) => (Some(e), None),
            None => self.embed_entity(&params.title, &params.content).await,
        };

        let point = NewPoint {
            id: params.id,
            title: params.title,
            content: params.content,
            category: params.category,
            author_id,
            author_name: params.author_name.unwrap_or_default(),
            recipients: params.recipients.unwrap_or_default(),
            created_at: params.created_at,
            embedding,
            embedding_text: text,
            prayer_id: params.prayer_id,
        };
        let outcome = self.client.create_point(point).await.map_err(|e| e.to_wire())?;
        self.outcome_json(outcome)
    }

    /// Create (or update by id) a prayer topic.
    #[tool(description = "Create a prayer topic that groups related prayer points. Reusing an id updates the topic and keeps its journey.")]
    async fn create_topic(
        &self,
        Parameters(params): Parameters<CreateTopicParams>,
    ) -> Result<String, String> {
        let author_id = self.owner(params.author_id.as_deref())?;
        let content = params.content.unwrap_or_default();
        tracing::info!(author = %author_id, "create_topic called");

        let (embedding, text) = match params.embedding {
            Some(e) => (Some(e), None),
            None => self.embed_entity(&params.title, &content).await,
        };

        let topic = NewTopic {
            id: params.id,
            title: params.title,
            content,
            author_id,
            author_name: params.author_name.unwrap_or_default(),
            embedding,
            embedding_text: text,
        };
        let outcome = self.client.create_topic(topic).await.map_err(|e| e.to_wire())?;
        self.outcome_json(outcome)
    }

    /// Apply a partial update to a point or topic.
    #[tool(description = "Update fields of a prayer point or topic. Changes to a point's category or embedding re-aggregate its topics.")]
    async fn update_entity(
        &self,
        Parameters(params): Parameters<UpdateEntityParams>,
    ) -> Result<String, String> {
        tracing::info!(entity_type = %params.entity_type, id = %params.id, "update_entity called");
        let mut patch = params.patch;

        let text_changed = !patch.title.is_unchanged() || !patch.content.is_unchanged();
        if params.reembed.unwrap_or(true) && text_changed && patch.embedding.is_unchanged() {
            let (entity_type, id) = (params.entity_type, params.id.clone());
            let current = self
                .read(move |conn| {
                    Ok(match entity_type {
                        EntityType::Point => store::get_point(conn, &id)?.map(|p| (p.title, p.content)),
                        EntityType::Topic => store::get_topic(conn, &id)?.map(|t| (t.title, t.content)),
                    })
                })
                .await?;

            if let Some((title, content)) = current {
                let title = match &patch.title {
                    FieldUpdate::Set(t) => t.clone(),
                    _ => title,
                };
                let content = match &patch.content {
                    FieldUpdate::Set(c) => c.clone(),
                    _ => content,
                };
                if let (Some(v), Some(text)) = self.embed_entity(&title, &content).await {
                    patch.embedding = FieldUpdate::Set(v);
                    patch.embedding_text = FieldUpdate::Set(text);
                }
            }
        }

        let outcome = self
            .client
            .update(params.entity_type, &params.id, patch)
            .await
            .map_err(|e| e.to_wire())?;
        self.outcome_json(outcome)
    }

    /// Link a point to a topic, or group two points under a new topic.
    #[tool(description = "Link a prayer point to an existing topic (topic_id), or to another point (other_point_id), which creates a new topic containing both. Re-aggregates the topic.")]
    async fn link_point_to_topic(
        &self,
        Parameters(params): Parameters<LinkPointParams>,
    ) -> Result<String, String> {
        tracing::info!(point_id = %params.point_id, "link_point_to_topic called");
        let target = match (params.topic_id, params.other_point_id) {
            (Some(id), None) => LinkTarget::Topic { id },
            (None, Some(id)) => LinkTarget::Point {
                id,
                new_topic_title: params.new_topic_title,
                new_topic_id: None,
            },
            _ => {
                return Err(
                    GraphError::invalid("provide exactly one of topic_id or other_point_id").to_wire(),
                )
            }
        };
        let outcome = self
            .client
            .link(&params.point_id, target)
            .await
            .map_err(|e| e.to_wire())?;
        self.outcome_json(outcome)
    }

    /// Add and remove a point's topic links in one step.
    #[tool(description = "Unlink a prayer point from topics (remove) and optionally link it to others (add), atomically. Re-aggregates every affected topic.")]
    async fn unlink_point_from_topic(
        &self,
        Parameters(params): Parameters<UpdateLinksParams>,
    ) -> Result<String, String> {
        tracing::info!(
            point_id = %params.point_id,
            add = params.add.len(),
            remove = params.remove.len(),
            "unlink_point_from_topic called"
        );
        let outcome = self
            .client
            .update_links(&params.point_id, params.add, params.remove)
            .await
            .map_err(|e| e.to_wire())?;
        self.outcome_json(outcome)
    }

    /// Delete a point or topic and clean up the other side of its links.
    #[tool(description = "Delete a prayer point or topic. Links on the other side are removed and affected topics re-aggregated. Deleting a missing entity succeeds.")]
    async fn delete_entity(
        &self,
        Parameters(params): Parameters<DeleteEntityParams>,
    ) -> Result<String, String> {
        tracing::info!(entity_type = %params.entity_type, id = %params.id, "delete_entity called");
        let outcome = self
            .client
            .delete(params.entity_type, &params.id)
            .await
            .map_err(|e| e.to_wire())?;
        self.outcome_json(outcome)
    }

    /// Find the owner's points or topics most similar to a query.
    #[tool(description = "Find the most similar prayer points (or topics) to a query embedding or text, among the owner's own entities. Returns id, type, title, category, and similarity.")]
    async fn find_similar(
        &self,
        Parameters(params): Parameters<FindSimilarParams>,
    ) -> Result<String, String> {
        let owner = self.owner(params.owner_id.as_deref())?;
        let query = self
            .query_vector(params.query_embedding, params.query_text)
            .await?;

        let request = FindSimilarRequest {
            query_embedding: query,
            top_k: params.top_k.unwrap_or(self.config.search.default_top_k),
            exclude_id: params.exclude_id,
            owner_id: owner,
            target: params.target.unwrap_or(EntityType::Point),
        };
        let limits = SearchLimits::from(&self.config.search);
        let results = self
            .read(move |conn| search::find_similar(conn, &request, limits))
            .await?;

        tracing::info!(results = results.len(), "find_similar returned");
        serde_json::to_string(&serde_json::json!({
            "results": results,
            "total": results.len(),
        }))
        .map_err(|e| format!("serialization failed: {e}"))
    }

    /// Rank several queries against one shared candidate pool.
    #[tool(description = "Find similar prayer points for several queries at once. Returns a map from each query id to its ranked results; a query never matches its own id.")]
    async fn find_similar_batch(
        &self,
        Parameters(params): Parameters<FindSimilarBatchParams>,
    ) -> Result<String, String> {
        let owner = self.owner(params.owner_id.as_deref())?;

        let mut queries = Vec::with_capacity(params.queries.len());
        for q in params.queries {
            let embedding = self
                .query_vector(q.embedding, q.text)
                .await
                .map_err(|e| format!("query {}: {e}", q.id))?;
            queries.push(BatchQuery { id: q.id, embedding });
        }

        let request = FindSimilarBatchRequest {
            queries,
            top_k: params.top_k.unwrap_or(self.config.search.default_top_k),
            owner_id: owner,
            target: params.target.unwrap_or(EntityType::Point),
        };
        let limits = SearchLimits::from(&self.config.search);
        let results = self
            .read(move |conn| search::find_similar_batch(conn, &request, limits))
            .await?;

        tracing::info!(queries = results.len(), "find_similar_batch returned");
        serde_json::to_string(&results).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Rebuild a topic's aggregated embedding and categories.
    #[tool(description = "Recompute a topic's aggregated embedding and category set from its most recent linked points. Idempotent.")]
    async fn recompute_topic_aggregate(
        &self,
        Parameters(params): Parameters<RecomputeAggregateParams>,
    ) -> Result<String, String> {
        tracing::info!(topic_id = %params.topic_id, "recompute_topic_aggregate called");
        let outcome = self
            .client
            .recompute(&params.topic_id)
            .await
            .map_err(|e| e.to_wire())?;
        self.outcome_json(outcome)
    }

    /// Show a point or topic as stored.
    #[tool(description = "Inspect a prayer point or topic by id, including links, journey, categories, and aggregate status.")]
    async fn inspect_entity(
        &self,
        Parameters(params): Parameters<InspectEntityParams>,
    ) -> Result<String, String> {
        let (entity_type, id) = (params.entity_type, params.id);
        let lookup_id = id.clone();
        let entity = self
            .read(move |conn| {
                Ok(match entity_type {
                    EntityType::Point => store::get_point(conn, &lookup_id)?
                        .map(serde_json::to_value)
                        .transpose()?,
                    EntityType::Topic => store::get_topic(conn, &lookup_id)?
                        .map(serde_json::to_value)
                        .transpose()?,
                })
            })
            .await?
            .ok_or_else(|| GraphError::not_found(format!("{entity_type} not found: {id}")).to_wire())?;

        let entity = if params.include_embeddings.unwrap_or(false) {
            entity
        } else {
            summarize_embeddings(entity)
        };
        serde_json::to_string(&entity).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Report or replay the offline mutation queue.
    #[tool(description = "Show mutations waiting to be applied to the graph, and optionally replay them now (run=true).")]
    async fn sync_queue(
        &self,
        Parameters(params): Parameters<SyncQueueParams>,
    ) -> Result<String, String> {
        let report = if params.run.unwrap_or(false) {
            Some(self.client.sync().await)
        } else {
            None
        };

        let pending: Vec<serde_json::Value> = self
            .client
            .queue()
            .pending()
            .into_iter()
            .map(|a| {
                serde_json::json!({
                    "id": a.id,
                    "kind": a.operation.kind(),
                    "enqueuedAt": a.enqueued_at,
                    "attempts": a.attempts,
                    "lastError": a.last_error,
                    "parked": a.parked,
                })
            })
            .collect();

        serde_json::to_string(&serde_json::json!({
            "report": report,
            "pending": pending,
            "syncing": self.client.queue().is_syncing(),
        }))
        .map_err(|e| format!("serialization failed: {e}"))
    }
}

impl OrisonTools {
    fn owner(&self, requested: Option<&str>) -> Result<String, String> {
        self.config.resolve_owner(requested).ok_or_else(|| {
            GraphError::Unauthenticated(
                "no owner given and no default owner configured (set ORISON_OWNER)".into(),
            )
            .to_wire()
        })
    }

    /// Run a closure against the database on the blocking pool.
    async fn read<T, F>(&self, f: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> orison::error::Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|e| GraphError::internal(format!("db lock poisoned: {e}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| format!("internal: db task failed: {e}"))?
        .map_err(|e| e.to_wire())
    }

    /// Embed an entity's text. A provider failure is logged and the entity is
    /// stored without a vector; `orison re-embed` fills it in later.
    async fn embed_entity(&self, title: &str, content: &str) -> (Option<Vec<f32>>, Option<String>) {
        let text = embedding_text(title, content);
        if text.is_empty() || self.embedding.dimensions() == 0 {
            return (None, None);
        }
        match self.embedding.embed(&text).await {
            Ok(v) => (Some(v), Some(text)),
            Err(e) => {
                tracing::warn!(
                    provider = self.embedding.name(),
                    error = %e,
                    "embedding failed, storing without a vector"
                );
                (None, None)
            }
        }
    }

    async fn query_vector(
        &self,
        embedding: Option<Vec<f32>>,
        text: Option<String>,
    ) -> Result<Vec<f32>, String> {
        match (embedding, text) {
            (Some(e), _) => Ok(e),
            (None, Some(t)) => self.embedding.embed(&t).await.map_err(|e| e.to_wire()),
            (None, None) => {
                Err(GraphError::invalid("provide a query embedding or query text").to_wire())
            }
        }
    }

    fn outcome_json(&self, outcome: MutationOutcome) -> Result<String, String> {
        if let MutationOutcome::Queued { action_id } = &outcome {
            tracing::info!(action_id = %action_id, "mutation queued, will apply on next sync");
        }
        serde_json::to_string(&serde_json::json!({
            "outcome": outcome,
            "pendingSync": self.client.has_pending(),
        }))
        .map_err(|e| format!("serialization failed: {e}"))
    }
}

/// Replace embedding arrays with their dimension count.
fn summarize_embeddings(mut entity: serde_json::Value) -> serde_json::Value {
    if let Some(obj) = entity.as_object_mut() {
        for key in ["embedding", "aggregatedEmbedding"] {
            if let Some(dims) = obj.remove(key).and_then(|v| v.as_array().map(Vec::len)) {
                obj.insert(format!("{key}Dims"), dims.into());
            }
        }
    }
    entity
}

#[tool_handler]
impl ServerHandler for OrisonTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Orison keeps a graph of prayer points and topics. Use create_point and \
                 create_topic to record prayers, link_point_to_topic to group them, and \
                 find_similar to surface related prayers. Writes made while the store is \
                 busy are queued; sync_queue shows and replays them."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
