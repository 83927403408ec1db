//! OpenAI-compatible `/embeddings` client.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::{GraphError, Result};

pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiProvider {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            dimensions,
        })
    }

    /// Reads the API key from the environment variable named in the config.
    pub fn from_config(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env).with_context(|| {
            format!(
                "embedding provider \"openai\" needs an API key in ${}; set it or use provider = \"none\"",
                config.api_key_env
            )
        })?;
        Self::new(
            &config.endpoint,
            &config.model,
            api_key,
            config.dimensions,
            Duration::from_secs(config.timeout_secs),
        )
    }
}

/// Map an HTTP status to the error kind callers act on.
fn status_error(status: StatusCode, body: &str) -> GraphError {
    let msg = format!("embedding request failed ({status}): {}", body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        GraphError::Transient(msg)
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        GraphError::Unauthenticated(msg)
    } else {
        GraphError::InvalidArgument(msg)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(GraphError::invalid("cannot embed empty text"));
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
            dimensions: (self.dimensions > 0).then_some(self.dimensions),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GraphError::Transient(format!("embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| GraphError::internal(format!("malformed embedding response: {e}")))?;

        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| GraphError::internal("embedding response contained no vector"))?;

        tracing::debug!(model = %self.model, dims = embedding.len(), "text embedded");
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "openai"
    }
}
