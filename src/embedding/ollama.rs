//! Ollama local embeddings backend
//!
//! Speaks Ollama's `POST /api/embeddings` contract. Selected via
//! `base_url` in `EmbeddingConfig` pointing at a local Ollama instance;
//! compiled only when the `ollama` feature is active.

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::embedding::Embedder;
use crate::error::{MnemosyneError, Result};

pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            model: config.model.clone(),
            dimension: config.dimension,
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed_raw(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": text,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MnemosyneError::EmbeddingUnavailable(format!(
                "ollama embeddings error {status}: {body}"
            )));
        }

        let data: serde_json::Value = response.json().await?;
        let embedding = data["embedding"]
            .as_array()
            .ok_or_else(|| {
                MnemosyneError::EmbeddingUnavailable("malformed ollama response".to_string())
            })?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn role_prefix(&self, _role: crate::types::EmbedRole) -> Option<&str> {
        None
    }
}
