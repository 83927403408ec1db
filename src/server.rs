//! MCP server initialization for stdio and SSE transports.
//!
//! Provides [`serve_stdio`] and [`serve_sse`] entry points that wire up the
//! graph database, offline queue, sync worker, embedding provider, and MCP tool
//! handler into a running server. Both also run the periodic aggregate
//! reconcile sweep.

use anyhow::Result;
use rmcp::ServiceExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::tools::OrisonTools;
use orison::config::OrisonConfig;
use orison::db;
use orison::embedding::{self, EmbeddingProvider};
use orison::graph::aggregate;
use orison::sync::{GraphClient, LocalRemote, OfflineMutationQueue, SqliteKvStore, SyncHandle, SyncWorker};

/// Everything the tool handler and background tasks share.
struct SharedState {
    db: Arc<Mutex<rusqlite::Connection>>,
    client: GraphClient,
    embedding: Arc<dyn EmbeddingProvider>,
    config: Arc<OrisonConfig>,
    sync: SyncHandle,
    reconcile: tokio::task::JoinHandle<()>,
}

impl SharedState {
    fn tools(&self) -> OrisonTools {
        OrisonTools::new(
            self.db.clone(),
            self.client.clone(),
            self.embedding.clone(),
            self.config.clone(),
        )
    }

    async fn shutdown(self) {
        self.reconcile.abort();
        self.sync.shutdown().await;
    }
}

/// Shared setup: open the graph and queue stores, create the embedding
/// provider, and start the background tasks.
fn setup_shared_state(config: OrisonConfig) -> Result<SharedState> {
    let db_path = config.resolved_db_path();
    let conn = db::open_database(&db_path)?;
    let health = db::check_database_health(&conn)?;
    tracing::info!(
        db = %db_path.display(),
        points = health.point_count,
        topics = health.topic_count,
        dirty_topics = health.dirty_topic_count,
        "database ready"
    );
    if !health.integrity_ok {
        tracing::warn!("database integrity check failed");
    }
    let db = Arc::new(Mutex::new(conn));

    let queue_path = config.resolved_queue_path();
    let store = Arc::new(SqliteKvStore::open(&queue_path)?);
    let queue = Arc::new(OfflineMutationQueue::load(store));
    tracing::info!(
        queue = %queue_path.display(),
        pending = queue.active_len(),
        parked = queue.parked_len(),
        "offline queue ready"
    );

    let provider = embedding::create_provider(&config.embedding)?;
    let embedding: Arc<dyn EmbeddingProvider> = Arc::from(provider);
    tracing::info!(provider = embedding.name(), "embedding provider ready");

    let limit = config.aggregation.recent_point_limit;
    let remote = Arc::new(LocalRemote::new(db.clone(), limit));
    let sync = SyncWorker::new(queue.clone(), remote.clone())
        .with_poll_interval(Duration::from_secs(config.sync.poll_interval_secs))
        .spawn(true);
    let client = GraphClient::new(remote, queue).with_sync_trigger(sync.notifier());

    let reconcile = spawn_reconcile(db.clone(), &config);
    let config = Arc::new(config);

    Ok(SharedState {
        db,
        client,
        embedding,
        config,
        sync,
        reconcile,
    })
}

/// Periodically recompute dirty or stale topic aggregates.
fn spawn_reconcile(
    db: Arc<Mutex<rusqlite::Connection>>,
    config: &OrisonConfig,
) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(config.aggregation.reconcile_interval_secs.max(1));
    let stale_after = chrono::Duration::hours(config.aggregation.stale_after_hours as i64);
    let point_limit = config.aggregation.recent_point_limit;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let db = db.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                let mut conn = db
                    .lock()
                    .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
                aggregate::reconcile_stale_aggregates(&mut conn, stale_after, 1000, point_limit)
                    .map_err(anyhow::Error::from)
            })
            .await;
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "reconcile sweep failed"),
                Err(e) => tracing::warn!(error = %e, "reconcile task panicked"),
            }
        }
    })
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: OrisonConfig) -> Result<()> {
    tracing::info!("starting Orison MCP server on stdio");

    let state = setup_shared_state(config)?;
    let transport = rmcp::transport::stdio();

    let server = state.tools().serve(transport).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    state.shutdown().await;
    tracing::info!("MCP server shut down");

    Ok(())
}

/// Start the MCP server over Streamable HTTP (SSE) transport.
pub async fn serve_sse(config: OrisonConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting Orison MCP server on SSE/HTTP");

    let state = setup_shared_state(config)?;
    let (db, client, embedding, shared_config) = (
        state.db.clone(),
        state.client.clone(),
        state.embedding.clone(),
        state.config.clone(),
    );

    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || {
            Ok(OrisonTools::new(
                db.clone(),
                client.clone(),
                embedding.clone(),
                shared_config.clone(),
            ))
        },
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down SSE server");
        })
        .await?;

    state.shutdown().await;
    Ok(())
}
