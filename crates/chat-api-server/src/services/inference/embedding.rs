use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::utils::error::ApiError;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    content: &'a str,
    input: &'a str,
}

#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    config: EmbeddingConfig,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }

    async fn embed_internal(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for {} chars", text.len());

        let request = EmbeddingRequest {
            model: &self.config.model,
            content: text,
            // Sent alongside `content` for OpenAI-style servers.
            input: text,
        };

        let url = format!("{}/embedding", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to connect to embedding server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        let json_value: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse embedding response as JSON")?;

        let embedding = Self::extract_embedding(&json_value)
            .ok_or_else(|| anyhow::anyhow!("Unrecognized embedding response format: {}", json_value))?;

        if embedding.is_empty() {
            anyhow::bail!("Generated embedding is empty");
        }

        if embedding.len() != self.config.dimension {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.config.dimension,
                embedding.len()
            );
        }

        Ok(embedding)
    }

    /// Accepts the three response shapes seen in the wild:
    /// `{"embedding": [...]}`, `{"data": [{"embedding": [...]}]}` and a
    /// bare array of floats.
    fn extract_embedding(value: &serde_json::Value) -> Option<Vec<f32>> {
        let floats = |arr: &Vec<serde_json::Value>| -> Vec<f32> {
            arr.iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect()
        };

        if let Some(arr) = value.get("embedding").and_then(|e| e.as_array()) {
            return Some(floats(arr));
        }
        if let Some(arr) = value
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|d| d.first())
            .and_then(|first| first.get("embedding"))
            .and_then(|e| e.as_array())
        {
            return Some(floats(arr));
        }
        if let Some(arr) = value.as_array() {
            if arr.iter().all(|v| v.is_number()) {
                return Some(floats(arr));
            }
        }
        None
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        self.embed_internal(text)
            .await
            .map_err(|e| ApiError::CapabilityError(e.to_string()))
    }
}
