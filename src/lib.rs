//! Mnemosyne - persistent memory engine for AI agents
//!
//! Chunked, embedded, semantically-searchable memory with a typed
//! knowledge graph layered on top. A single SQLite connection backs the
//! relational store, the per-category vector collections, and the
//! embedding cache; see `storage::connection` for why that matters.

pub mod backup;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod locks;
pub mod manager;
pub mod storage;
pub mod types;
pub mod vector;

pub use backup::{export, import, BackupDocument, ImportReport};
pub use config::EngineConfig;
pub use error::{MnemosyneError, Result};
pub use manager::{
    ConsolidationReport, DiscoverReport, MemoryManager, ReconciliationReport, RelatedMemory, ScoredMemory, Suggestion,
};
pub use storage::Storage;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
