mod cli;
mod server;
mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use orison::config::OrisonConfig;
use orison::graph::types::EntityType;

#[derive(Parser)]
#[command(name = "orison", version, about = "Prayer graph MCP server with offline sync")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (stdio transport unless --http)
    Serve {
        /// Serve Streamable HTTP on server.host:server.port instead of stdio
        #[arg(long)]
        http: bool,
    },
    /// Link a point to a topic
    Link {
        point_id: String,
        topic_id: String,
    },
    /// Link two points under a new shared topic
    LinkPoints {
        point_id: String,
        other_point_id: String,
        /// Title for the new topic (defaults to the first point's title)
        #[arg(long)]
        title: Option<String>,
    },
    /// Remove a point from a topic
    Unlink {
        point_id: String,
        topic_id: String,
    },
    /// Replay pending offline actions
    Sync,
    /// Inspect the offline mutation queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Recompute dirty or stale topic aggregates
    Reconcile {
        /// Recompute every topic, not just stale ones
        #[arg(long)]
        all: bool,
    },
    /// Find points or topics related to some text
    Search {
        text: String,
        /// Owner whose prayers are searched (defaults to storage.default_owner)
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, value_enum, default_value_t = Kind::Point)]
        kind: Kind,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Backfill missing embeddings with the configured provider
    ReEmbed {
        /// Re-embed everything, not just entities without a vector
        #[arg(long)]
        all: bool,
    },
    /// Show full details and audit history for a point or topic
    Inspect {
        #[arg(value_enum)]
        kind: Kind,
        id: String,
    },
    /// Run database diagnostics
    Doctor,
}

#[derive(Subcommand)]
enum QueueAction {
    /// List pending actions, oldest first
    List,
    /// Requeue a parked action that the graph rejected
    Retry { id: String },
    /// Drop a pending action without applying it
    Drop { id: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Point,
    Topic,
}

impl From<Kind> for EntityType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Point => EntityType::Point,
            Kind::Topic => EntityType::Topic,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = OrisonConfig::load()?;

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter =
        EnvFilter::try_new(&config.server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { http } => {
            if http || config.server.transport == "sse" {
                server::serve_sse(config).await?;
            } else {
                server::serve_stdio(config).await?;
            }
        }
        Command::Link { point_id, topic_id } => {
            cli::link::link(&config, &point_id, &topic_id).await?;
        }
        Command::LinkPoints {
            point_id,
            other_point_id,
            title,
        } => {
            cli::link::link_points(&config, &point_id, &other_point_id, title).await?;
        }
        Command::Unlink { point_id, topic_id } => {
            cli::link::unlink(&config, &point_id, &topic_id).await?;
        }
        Command::Sync => cli::sync::sync(&config).await?,
        Command::Queue { action } => match action {
            QueueAction::List => cli::queue::list(&config)?,
            QueueAction::Retry { id } => cli::queue::retry(&config, &id)?,
            QueueAction::Drop { id } => cli::queue::drop(&config, &id)?,
        },
        Command::Reconcile { all } => cli::reconcile::reconcile(&config, all)?,
        Command::Search {
            text,
            owner,
            kind,
            top_k,
        } => {
            cli::search::search(&config, &text, owner.as_deref(), kind.into(), top_k).await?;
        }
        Command::ReEmbed { all } => cli::re_embed::re_embed(&config, all).await?,
        Command::Inspect { kind, id } => cli::inspect::inspect(&config, kind.into(), &id)?,
        Command::Doctor => cli::doctor::doctor(&config)?,
    }

    Ok(())
}
