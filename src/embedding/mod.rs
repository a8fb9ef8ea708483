//! Embedding client: normalizes text, calls an external embedding model, and
//! returns a vector of the configured dimension. Implementations prepend
//! model-specific role prefixes when the configured model demands it.
//! Concurrency-safe and cancellation-safe; in-flight request count is
//! bounded via a semaphore.

mod cache;
pub mod hash_embedder;
#[cfg(feature = "ollama")]
pub mod ollama;
#[cfg(feature = "openai")]
pub mod openai;

pub use cache::{cache_key, EmbeddingCache, EmbeddingCacheStats};
pub use hash_embedder::HashEmbedder;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::config::EmbeddingConfig;
use crate::error::{MnemosyneError, Result};
use crate::types::EmbedRole;

/// Build the embedder named by `config.model`, falling back to the
/// deterministic hash embedder for anything not recognized as a hosted
/// backend. `"dev-hash"` always selects the hash embedder explicitly.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.model.as_str() {
        #[cfg(feature = "openai")]
        "openai" => Ok(Arc::new(openai::OpenAiEmbedder::new(config)?)),
        #[cfg(feature = "ollama")]
        "ollama" => Ok(Arc::new(ollama::OllamaEmbedder::new(config))),
        _ => Ok(Arc::new(HashEmbedder::new(config.dimension))),
    }
}

/// Embeds free text into a fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Low-level single call to the model; no retry, no role prefixing.
    async fn embed_raw(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;

    fn model_id(&self) -> &str;

    /// Prefix applied to `text` for the given role, if the model wants one.
    fn role_prefix(&self, _role: EmbedRole) -> Option<&str> {
        None
    }
}

/// Wraps any `Embedder` with normalization, role prefixing, bounded
/// concurrency, and bounded exponential-backoff retry.
pub struct EmbeddingClient {
    inner: Arc<dyn Embedder>,
    max_retries: u32,
    retry_base: Duration,
    semaphore: Arc<Semaphore>,
}

impl EmbeddingClient {
    pub fn new(inner: Arc<dyn Embedder>, config: &EmbeddingConfig) -> Self {
        Self {
            inner,
            max_retries: config.max_retries,
            retry_base: Duration::from_millis(config.retry_base_ms),
            semaphore: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
        }
    }

    pub fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    pub fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    /// Prefix the underlying model wants for cache normalization purposes.
    pub fn role_prefix(&self, role: EmbedRole) -> Option<&str> {
        self.inner.role_prefix(role)
    }

    /// Embed `text` in the given role. Fails with `InvalidInput` on empty
    /// text, `EmbeddingMismatch` if the model returns the wrong dimension,
    /// `EmbeddingUnavailable` after exhausting retries.
    pub async fn embed(&self, text: &str, role: EmbedRole) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(MnemosyneError::InvalidInput(
                "embedding text must not be empty".to_string(),
            ));
        }

        let prefixed = match self.inner.role_prefix(role) {
            Some(prefix) => format!("{prefix}{text}"),
            None => text.to_string(),
        };

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| MnemosyneError::CancelledOrTimedOut(e.to_string()))?;

        let mut attempt = 0;
        loop {
            match self.inner.embed_raw(&prefixed).await {
                Ok(vector) => {
                    if vector.len() != self.dimension() {
                        return Err(MnemosyneError::EmbeddingMismatch {
                            expected: self.dimension(),
                            actual: vector.len(),
                        });
                    }
                    return Ok(vector);
                }
                Err(e) if attempt < self.max_retries => {
                    tracing::warn!(attempt, error = %e, "embedding call failed, retrying");
                    tokio::time::sleep(self.retry_base * 2u32.pow(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "embedding call failed after retries");
                    return Err(MnemosyneError::EmbeddingUnavailable(e.to_string()));
                }
            }
        }
    }
}

/// Normalize text for cache-key purposes: strip leading/trailing
/// whitespace and a role prefix if present; internal whitespace is left
/// untouched so distinct-but-whitespace-equivalent inputs still collide
/// only when they genuinely should.
pub fn normalize_for_cache(text: &str, prefix: Option<&str>) -> String {
    let trimmed = text.trim();
    match prefix {
        Some(p) if trimmed.starts_with(p) => trimmed[p.len()..].to_string(),
        _ => trimmed.to_string(),
    }
}

/// Cosine similarity between two equal-length vectors; 0.0 for mismatched
/// lengths, empty vectors, or zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_is_one() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn normalize_strips_whitespace_and_prefix() {
        assert_eq!(
            normalize_for_cache("  search_query: hello world  ", Some("search_query: ")),
            "hello world"
        );
        assert_eq!(
            normalize_for_cache("  hello  world  ", None),
            "hello  world"
        );
    }
}
