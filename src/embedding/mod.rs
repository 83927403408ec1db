//! Text-to-vector embedding.
//!
//! Provides the [`EmbeddingProvider`] trait, an OpenAI-compatible HTTP
//! implementation, and [`DisabledProvider`] for deployments where every caller
//! supplies its own vectors. The provider is created via [`create_provider`]
//! from configuration.

pub mod openai;

use async_trait::async_trait;

use crate::error::{GraphError, Result};

/// Turns text into an embedding vector.
///
/// Network and rate-limit failures are reported as `Transient` so callers can
/// retry or store the entity without a vector and backfill it later.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimension of the vectors this provider returns. 0 when unknown.
    fn dimensions(&self) -> usize;

    fn name(&self) -> &str;
}

/// Provider used when `embedding.provider = "none"`.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(GraphError::invalid(
            "embedding provider is disabled; supply an embedding instead of text",
        ))
    }

    fn dimensions(&self) -> usize {
        0
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Create an embedding provider from config.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> anyhow::Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(openai::OpenAiProvider::from_config(config)?)),
        "none" => Ok(Box::new(DisabledProvider)),
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: openai, none"),
    }
}

/// Text used to embed a point or topic: title and content, trimmed.
pub fn embedding_text(title: &str, content: &str) -> String {
    match (title.trim(), content.trim()) {
        ("", c) => c.to_string(),
        (t, "") => t.to_string(),
        (t, c) => format!("{t}\n\n{c}"),
    }
}
