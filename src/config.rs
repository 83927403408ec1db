use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct OrisonConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub aggregation: AggregationConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    pub log_level: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// The prayer graph database.
    pub db_path: String,
    /// Durable store for the offline mutation queue.
    pub queue_path: String,
    /// Caller id used when a request does not name one.
    pub default_owner: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"openai"` (any OpenAI-compatible endpoint) or `"none"`.
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub dimensions: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub max_query_dims: usize,
    pub candidate_pool: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AggregationConfig {
    /// Most recent linked points that contribute to a topic aggregate.
    pub recent_point_limit: usize,
    pub reconcile_interval_secs: u64,
    pub stale_after_hours: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// Periodic retry of queued actions while online. 0 disables polling;
    /// queued mutations still wake the worker.
    pub poll_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            log_level: "info".into(),
            host: "127.0.0.1".into(),
            port: 7411,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let dir = default_orison_dir();
        Self {
            db_path: dir.join("graph.db").to_string_lossy().into_owned(),
            queue_path: dir.join("queue.db").to_string_lossy().into_owned(),
            default_owner: String::new(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "text-embedding-3-small".into(),
            endpoint: "https://api.openai.com/v1/embeddings".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            dimensions: 1536,
            timeout_secs: 20,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: crate::graph::search::MAX_TOP_K,
            max_query_dims: crate::graph::search::MAX_QUERY_DIMS,
            candidate_pool: 500,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            recent_point_limit: crate::graph::aggregate::DEFAULT_RECENT_POINT_LIMIT,
            reconcile_interval_secs: 3600,
            stale_after_hours: 24,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
        }
    }
}

/// Returns `~/.orison/`, falling back to `./.orison` when there is no home directory.
pub fn default_orison_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".orison")
}

/// Returns the default config file path: `~/.orison/config.toml`
pub fn default_config_path() -> PathBuf {
    default_orison_dir().join("config.toml")
}

impl OrisonConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            OrisonConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (ORISON_DB, ORISON_QUEUE, ORISON_OWNER,
    /// ORISON_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ORISON_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("ORISON_QUEUE") {
            self.storage.queue_path = val;
        }
        if let Ok(val) = std::env::var("ORISON_OWNER") {
            self.storage.default_owner = val;
        }
        if let Ok(val) = std::env::var("ORISON_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn resolved_queue_path(&self) -> PathBuf {
        expand_tilde(&self.storage.queue_path)
    }

    /// Resolve the caller for a request: an explicit owner wins, else the configured default.
    /// Returns `None` when neither names anyone.
    pub fn resolve_owner(&self, requested: Option<&str>) -> Option<String> {
        requested
            .filter(|o| !o.trim().is_empty())
            .map(str::to_string)
            .or_else(|| {
                let default = self.storage.default_owner.trim();
                (!default.is_empty()).then(|| default.to_string())
            })
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
