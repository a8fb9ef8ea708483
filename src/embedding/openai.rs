//! OpenAI-compatible embeddings backend
//!
//! Speaks the `POST /v1/embeddings` contract shared by OpenAI and most
//! self-hosted OpenAI-compatible servers. Selected via `base_url`/`api_key`
//! in `EmbeddingConfig`; compiled only when the `openai` feature is active.

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::embedding::Embedder;
use crate::error::{MnemosyneError, Result};

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            MnemosyneError::InvalidInput("openai embedding backend requires api_key".to_string())
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_raw(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "input": text,
                "model": self.model,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MnemosyneError::EmbeddingUnavailable(format!(
                "openai embeddings error {status}: {body}"
            )));
        }

        let data: serde_json::Value = response.json().await?;
        let embedding = data["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| {
                MnemosyneError::EmbeddingUnavailable("malformed openai response".to_string())
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
