//! Error types for the memory engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, MnemosyneError>;

/// Main error type for the memory engine
///
/// Variants mirror the error taxonomy from the component design: each
/// is a *kind*, not a wire code, so callers can match on it directly.
#[derive(Error, Debug)]
pub enum MnemosyneError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("memory not found: {0}")]
    NotFound(uuid::Uuid),

    #[error("duplicate edge: ({source}, {target}, {relation_type})")]
    DuplicateEdge {
        source: uuid::Uuid,
        target: uuid::Uuid,
        relation_type: String,
    },

    #[error("self loop rejected: {0}")]
    SelfLoop(uuid::Uuid),

    #[error("duplicate rejection: ({source}, {target}, {relation_type})")]
    DuplicateRejection {
        source: uuid::Uuid,
        target: uuid::Uuid,
        relation_type: String,
    },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingMismatch { expected: usize, actual: usize },

    #[error("consistency drift detected: {0}")]
    ConsistencyDrift(String),

    #[error("operation cancelled or timed out: {0}")]
    CancelledOrTimedOut(String),

    #[error("feature not available: {0}")]
    NotAvailable(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http request error: {0}")]
    #[cfg(any(feature = "openai", feature = "ollama"))]
    Http(#[from] reqwest::Error),
}

impl MnemosyneError {
    /// Whether the operation that produced this error may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MnemosyneError::StorageUnavailable(_)
                | MnemosyneError::EmbeddingUnavailable(_)
                | MnemosyneError::CancelledOrTimedOut(_)
        )
    }

    /// Whether this error is expected to be logged and swallowed rather
    /// than propagated to the caller (reconciliation work).
    pub fn is_background_only(&self) -> bool {
        matches!(self, MnemosyneError::ConsistencyDrift(_))
    }
}
