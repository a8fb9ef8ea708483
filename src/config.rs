//! Engine configuration
//!
//! Replaces the dynamic keyword-argument bags a scripting-language
//! implementation would pass to `store`/`recall`/`consolidate` with
//! explicit, serde-derived structs. Unknown keys at the top level are a
//! configuration-time error rather than silently ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::Category;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub recall: RecallConfig,
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_category")]
    pub default_category: Category,
}

fn default_category() -> Category {
    Category::Semantic
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Model identifier sent with each embedding request.
    pub model: String,
    /// D; MUST match the vector store collections' configured dimension.
    pub dimension: usize,
    /// Per-model role prefixes, e.g. "search_query:" / "search_document:".
    #[serde(default)]
    pub role_prefixes: HashMap<String, RolePrefixes>,
    /// Base URL for an OpenAI-compatible embeddings endpoint.
    pub base_url: Option<String>,
    /// API key, read from config or environment at call sites.
    pub api_key: Option<String>,
    /// Maximum retry attempts before surfacing `EmbeddingUnavailable`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Upper bound on concurrent in-flight embedding requests.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    200
}

fn default_max_in_flight() -> usize {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RolePrefixes {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub document: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// LRU bound on entry count; 0 = unbounded.
    #[serde(default)]
    pub max_entries: usize,
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_size")]
    pub target_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

fn default_target_size() -> usize {
    500
}

fn default_overlap() -> usize {
    50
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_size: default_target_size(),
            overlap: default_overlap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecallConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default)]
    pub min_score: f32,
    #[serde(default = "default_overfetch")]
    pub overfetch_factor: usize,
}

fn default_limit() -> usize {
    10
}

fn default_overfetch() -> usize {
    3
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            min_score: 0.0,
            overfetch_factor: default_overfetch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsolidationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    #[serde(default = "default_min_importance")]
    pub min_importance: f32,
}

fn default_similarity_threshold() -> f32 {
    0.9
}

fn default_max_age_days() -> i64 {
    180
}

fn default_min_importance() -> f32 {
    0.2
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: default_similarity_threshold(),
            max_age_days: default_max_age_days(),
            min_importance: default_min_importance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `suggest`/`discover` drop candidates scoring below this confidence.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// `discover` materializes a suggestion as an edge immediately once its
    /// confidence reaches this threshold.
    #[serde(default = "default_auto_accept_threshold")]
    pub auto_accept_threshold: f32,
    /// Default number of candidates `suggest` returns when the caller
    /// doesn't specify a limit.
    #[serde(default = "default_suggest_limit")]
    pub suggest_limit: usize,
}

fn default_min_confidence() -> f32 {
    0.5
}

fn default_auto_accept_threshold() -> f32 {
    0.85
}

fn default_suggest_limit() -> usize {
    5
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: default_min_confidence(),
            auto_accept_threshold: default_auto_accept_threshold(),
            suggest_limit: default_suggest_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Maximum retry attempts on a C4/C5 call before surfacing
    /// `StorageUnavailable`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

impl EngineConfig {
    /// A configuration good enough for tests and the CLI's quick-start path.
    pub fn dev_default() -> Self {
        Self {
            embedding: EmbeddingConfig {
                model: "dev-hash".to_string(),
                dimension: 64,
                role_prefixes: HashMap::new(),
                base_url: None,
                api_key: None,
                max_retries: default_max_retries(),
                retry_base_ms: default_retry_base_ms(),
                max_in_flight: default_max_in_flight(),
            },
            cache: CacheConfig::default(),
            chunking: ChunkingConfig::default(),
            recall: RecallConfig::default(),
            consolidation: ConsolidationConfig::default(),
            graph: GraphConfig::default(),
            storage: StorageConfig::default(),
            default_category: Category::Semantic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_top_level_key_is_a_config_error() {
        let json = serde_json::json!({
            "embedding": {"model": "x", "dimension": 8},
            "bogus_field": true
        });
        let result: Result<EngineConfig, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }

    #[test]
    fn defaults_match_spec() {
        let chunking = ChunkingConfig::default();
        assert_eq!(chunking.target_size, 500);
        assert_eq!(chunking.overlap, 50);
        let recall = RecallConfig::default();
        assert_eq!(recall.default_limit, 10);
        assert_eq!(recall.overfetch_factor, 3);
    }
}
