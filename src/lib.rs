//! Prayer graph consistency and offline sync.
//!
//! Orison keeps a small graph of prayer *points* (individual recorded prayers)
//! and prayer *topics* (themes that group points over time) consistent while
//! clients go on and offline. It is served to agents over
//! [MCP](https://modelcontextprotocol.io/) and driven from the `orison` CLI.
//!
//! Links are stored on both sides: a point lists its topics, and a topic keeps a
//! denormalized journey entry per point. Every link change re-derives the
//! topic's aggregate embedding (mean of its own vector and its most recent
//! points) and its category set. Mutations that cannot reach the graph are held
//! in a durable FIFO queue and replayed by a background worker.
//!
//! # Architecture
//!
//! - **Storage**: SQLite, JSON array columns, embeddings as `f32` BLOBs
//! - **Search**: brute-force cosine top-k over the owner's entities
//! - **Embeddings**: optional OpenAI-compatible HTTP provider
//! - **Transport**: MCP over stdio (primary) or Streamable HTTP
//!
//! # Modules
//!
//! - [`config`]: TOML configuration with environment overrides
//! - [`db`]: SQLite initialization, schema, migrations, and health checks
//! - [`embedding`]: text-to-vector providers
//! - [`error`]: the error kinds returned to callers
//! - [`graph`]: points, topics, linking, aggregation, and similarity search
//! - [`sync`]: offline mutation queue, client, and sync worker

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod sync;
