//! Memory manager: the engine façade.
//!
//! Owns chunking, embedding, and the vector store on behalf of callers, so
//! no caller can bypass the chunk-homogeneity invariant (every chunk of a
//! memory shares one embedding model and dimension) by writing points
//! directly. Per-`memory_id` serialization goes through `LockTable`;
//! `recall`/`search` take no lock.

mod consolidation;
mod graph;
mod reconcile;

pub use consolidation::ConsolidationReport;
pub use graph::{DiscoverReport, RelatedMemory, Suggestion};
pub use reconcile::ReconciliationReport;

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::chunk::Chunker;
use crate::config::EngineConfig;
use crate::embedding::{cache_key, create_embedder, normalize_for_cache, EmbeddingCache, EmbeddingClient};
use crate::error::{MnemosyneError, Result};
use crate::locks::LockTable;
use crate::storage::connection::Storage;
use crate::storage::GraphStore;
use crate::types::{
    default_importance, Category, ChunkPayload, ChunkPoint, Direction, EmbedRole, Memory, MemoryId,
    SortBy, WorkingContext,
};
use crate::vector::{PayloadFilter, ScoredPoint, ScrollCursor, VectorStore};

/// One recalled or searched memory paired with its relevance score.
/// `score` is `0.0` for `search` calls with no query vector.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub score: f32,
}

pub struct MemoryManager {
    vector: VectorStore,
    graph: GraphStore,
    embedder: EmbeddingClient,
    cache: EmbeddingCache,
    config: EngineConfig,
    locks: LockTable,
    context: parking_lot::RwLock<WorkingContext>,
    /// Mutually-exclusive lease for consolidate/forget/decay: only one
    /// maintenance operation may run at a time.
    maintenance_lease: tokio::sync::Mutex<()>,
}

impl MemoryManager {
    pub fn new(storage: Storage, config: EngineConfig) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let client = EmbeddingClient::new(embedder, &config.embedding);
        let cache = EmbeddingCache::new(storage.clone(), config.cache.max_entries);
        Ok(Self {
            vector: VectorStore::new(storage.clone()),
            graph: GraphStore::new(storage),
            embedder: client,
            cache,
            config,
            locks: LockTable::new(),
            context: parking_lot::RwLock::new(WorkingContext::default()),
            maintenance_lease: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    pub fn set_context(&self, context: WorkingContext) {
        *self.context.write() = context;
    }

    pub fn clear_context(&self) {
        *self.context.write() = WorkingContext::default();
    }

    /// Ingest `content` as a new logical memory: chunk, embed each chunk
    /// (role=document), and upsert all chunks in a single atomic call.
    #[allow(clippy::too_many_arguments)]
    pub async fn store(
        &self,
        content: impl Into<String>,
        category: Option<Category>,
        tags: Option<Vec<String>>,
        importance: Option<f32>,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<MemoryId> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(MnemosyneError::InvalidInput("content must not be empty".to_string()));
        }

        let category = category.unwrap_or(self.config.default_category);
        let tags = tags.unwrap_or_default();
        let importance = importance.unwrap_or_else(default_importance);
        let mut metadata = metadata.unwrap_or_default();
        self.context.read().merge_into(&mut metadata);

        let memory_id = Uuid::new_v4();
        let _guard = self.locks.acquire(memory_id).await;

        let chunks = Chunker::new(&content, &self.config.chunking).chunks();
        let chunk_count = chunks.len() as u32;
        let now = Utc::now();

        let mut points = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let vector = self.embed_cached(&chunk.content, EmbedRole::Document).await?;
            let payload_content = if chunk.index == 0 { content.clone() } else { chunk.content.clone() };
            points.push(ChunkPoint {
                point_id: Uuid::new_v4(),
                vector,
                payload: ChunkPayload {
                    memory_id,
                    chunk_index: chunk.index,
                    chunk_count,
                    content: payload_content,
                    category,
                    tags: tags.clone(),
                    importance,
                    metadata: metadata.clone(),
                    created_at: now,
                    updated_at: now,
                    last_accessed_at: now,
                    access_count: 0,
                },
            });
        }

        // `upsert` runs in one transaction, so a failure never leaves a
        // partial set of chunks behind for this `memory_id`.
        self.retry_storage("vector.upsert", || self.vector.upsert(category, &points)).await?;

        Ok(memory_id)
    }

    /// Embed `query` (role=query), search every requested category,
    /// deduplicate by `memory_id` keeping the max score, and bump access
    /// counters on every returned memory.
    pub async fn recall(
        &self,
        query: &str,
        categories: Option<Vec<Category>>,
        limit: Option<usize>,
        min_score: Option<f32>,
        text_match: Option<&str>,
        filters: Option<PayloadFilter>,
    ) -> Result<Vec<ScoredMemory>> {
        let limit = limit.unwrap_or(self.config.recall.default_limit);
        let min_score = min_score.unwrap_or(self.config.recall.min_score);
        let categories = categories.unwrap_or_else(|| Category::all().to_vec());
        let overfetch = limit
            .saturating_mul(self.config.recall.overfetch_factor.max(1))
            .max(limit);

        let query_vec = self.embed_cached(query, EmbedRole::Query).await?;

        let mut hits = Vec::new();
        for category in &categories {
            hits.extend(self.vector.search(*category, &query_vec, overfetch, filters.as_ref(), 1)?);
        }

        if let Some(needle) = text_match {
            let needle = needle.to_lowercase();
            hits.retain(|h| h.payload.content.to_lowercase().contains(&needle));
        }

        let mut best: HashMap<MemoryId, ScoredPoint> = HashMap::new();
        for hit in hits {
            best.entry(hit.payload.memory_id)
                .and_modify(|existing| {
                    if hit.score > existing.score {
                        *existing = hit.clone();
                    }
                })
                .or_insert(hit);
        }

        let mut ranked: Vec<ScoredPoint> = best
            .into_values()
            .filter(|h| h.score >= min_score)
            .collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(limit);

        let mut results = Vec::with_capacity(ranked.len());
        for hit in ranked {
            let memory_id = hit.payload.memory_id;
            let category = hit.payload.category;
            let chunk0 = if hit.payload.chunk_index == 0 {
                hit.payload.clone()
            } else {
                self.chunk0_payload(category, memory_id)?
                    .ok_or(MnemosyneError::NotFound(memory_id))?
            };
            self.bump_access(category, memory_id)?;
            results.push(ScoredMemory {
                memory: chunk0.to_memory(memory_id),
                score: hit.score,
            });
        }

        Ok(results)
    }

    /// Like `recall`, but `query` is optional: with no query, results are
    /// ranked by `sort_by` alone over a filtered scroll of chunk-0 payloads.
    pub async fn search(
        &self,
        query: Option<&str>,
        categories: Option<Vec<Category>>,
        filters: Option<PayloadFilter>,
        sort_by: SortBy,
        limit: usize,
    ) -> Result<Vec<ScoredMemory>> {
        if let Some(query) = query {
            return self.recall(query, categories, Some(limit), None, None, filters).await;
        }

        let categories = categories.unwrap_or_else(|| Category::all().to_vec());
        let mut memories = Vec::new();
        for category in categories {
            let mut cursor = ScrollCursor::default();
            loop {
                let (points, next) = self.vector.scroll(category, filters.as_ref(), cursor, 200)?;
                for point in points {
                    if point.payload.chunk_index == 0 {
                        let memory_id = point.payload.memory_id;
                        memories.push(ScoredMemory {
                            memory: point.payload.to_memory(memory_id),
                            score: 0.0,
                        });
                    }
                }
                match next {
                    Some(next_cursor) => cursor = next_cursor,
                    None => break,
                }
            }
        }

        sort_memories(&mut memories, sort_by);
        memories.truncate(limit);
        Ok(memories)
    }

    /// Update a memory's payload and/or content. Content changes rewrite all
    /// chunks; payload-only changes rewrite every existing chunk's payload,
    /// keeping them on the same embedding model and dimension.
    /// `metadata_patch` entries mapped to `None` delete the key; entries
    /// mapped to `Some(v)` overwrite it.
    pub async fn update(
        &self,
        memory_id: MemoryId,
        content: Option<String>,
        tags: Option<Vec<String>>,
        importance: Option<f32>,
        metadata_patch: Option<HashMap<String, Option<Value>>>,
    ) -> Result<()> {
        let _guard = self.locks.acquire(memory_id).await;

        let category = self.find_category(memory_id)?.ok_or(MnemosyneError::NotFound(memory_id))?;
        let existing = self.vector.list_by_memory(category, memory_id)?;
        let chunk0 = existing
            .iter()
            .find(|(_, p)| p.chunk_index == 0)
            .map(|(_, p)| p.clone())
            .ok_or(MnemosyneError::NotFound(memory_id))?;

        let new_tags = tags.unwrap_or_else(|| chunk0.tags.clone());
        let new_importance = importance.unwrap_or(chunk0.importance);
        let mut new_metadata = chunk0.metadata.clone();
        if let Some(patch) = metadata_patch {
            for (key, value) in patch {
                match value {
                    Some(v) => {
                        new_metadata.insert(key, v);
                    }
                    None => {
                        new_metadata.remove(&key);
                    }
                }
            }
        }

        let now = Utc::now();

        if let Some(new_content) = content {
            self.retry_storage("vector.delete_by_memory", || self.vector.delete_by_memory(category, memory_id))
                .await?;

            let chunks = Chunker::new(&new_content, &self.config.chunking).chunks();
            let chunk_count = chunks.len() as u32;
            let mut points = Vec::with_capacity(chunks.len());
            for chunk in &chunks {
                let vector = self.embed_cached(&chunk.content, EmbedRole::Document).await?;
                let payload_content = if chunk.index == 0 { new_content.clone() } else { chunk.content.clone() };
                points.push(ChunkPoint {
                    point_id: Uuid::new_v4(),
                    vector,
                    payload: ChunkPayload {
                        memory_id,
                        chunk_index: chunk.index,
                        chunk_count,
                        content: payload_content,
                        category,
                        tags: new_tags.clone(),
                        importance: new_importance,
                        metadata: new_metadata.clone(),
                        created_at: chunk0.created_at,
                        updated_at: now,
                        last_accessed_at: chunk0.last_accessed_at,
                        access_count: chunk0.access_count,
                    },
                });
            }
            self.retry_storage("vector.upsert", || self.vector.upsert(category, &points)).await?;
        } else {
            for (point_id, payload) in &existing {
                let mut updated = payload.clone();
                updated.tags = new_tags.clone();
                updated.importance = new_importance;
                updated.metadata = new_metadata.clone();
                updated.updated_at = now;
                self.retry_storage("vector.update_payload", || {
                    self.vector.update_payload(category, *point_id, &updated)
                })
                .await?;
            }
        }

        Ok(())
    }

    /// Remove every chunk of `memory_id` and any edge touching it. Idempotent:
    /// an unknown id is a no-op, not an error.
    pub async fn delete(&self, memory_id: MemoryId) -> Result<()> {
        let _guard = self.locks.acquire(memory_id).await;

        for edge in self.graph.list_edges(memory_id, Direction::Both, None)? {
            self.retry_storage("graph.delete_edge", || {
                self.graph.delete_edge(edge.source_id, edge.target_id, edge.relation_type)
            })
            .await?;
        }

        if let Some(category) = self.find_category(memory_id)? {
            self.retry_storage("vector.delete_by_memory", || self.vector.delete_by_memory(category, memory_id))
                .await?;
        }

        Ok(())
    }

    /// Retry a C4/C5 call on transient `Database` failures with exponential
    /// backoff, surfacing `StorageUnavailable` once `storage.max_retries` is
    /// exhausted. Non-database errors (e.g. `SelfLoop`, `DuplicateEdge`) pass
    /// straight through on the first attempt.
    async fn retry_storage<F, T>(&self, op_name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            tracing::debug!(op = op_name, attempt, "storage call");
            match op() {
                Ok(value) => return Ok(value),
                Err(MnemosyneError::Database(e)) if attempt < self.config.storage.max_retries => {
                    tracing::warn!(op = op_name, attempt, error = %e, "storage call failed, retrying");
                    let backoff = Duration::from_millis(self.config.storage.retry_base_ms) * 2u32.pow(attempt);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(MnemosyneError::Database(e)) => {
                    tracing::warn!(op = op_name, error = %e, "storage call failed after retries");
                    return Err(MnemosyneError::StorageUnavailable(e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub(crate) fn vector_store(&self) -> &VectorStore {
        &self.vector
    }

    pub(crate) fn embedder(&self) -> &EmbeddingClient {
        &self.embedder
    }

    pub(crate) fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub(crate) async fn embed_cached(&self, text: &str, role: EmbedRole) -> Result<Vec<f32>> {
        if !self.config.cache.enabled {
            return self.embedder.embed(text, role).await;
        }

        let model_id = self.embedder.model_id().to_string();
        let dimension = self.embedder.dimension();
        let prefix = self.embedder.role_prefix(role);
        let normalized = normalize_for_cache(text, prefix);
        let key = cache_key(&normalized, &model_id, dimension);

        if let Some(vector) = self.cache.get(&key, dimension)? {
            return Ok(vector);
        }

        let vector = self.embedder.embed(text, role).await?;
        self.cache.put(&key, &model_id, dimension, &vector)?;
        Ok(vector)
    }

    fn chunk0_payload(&self, category: Category, memory_id: MemoryId) -> Result<Option<ChunkPayload>> {
        Ok(self
            .vector
            .list_by_memory(category, memory_id)?
            .into_iter()
            .find(|(_, p)| p.chunk_index == 0)
            .map(|(_, p)| p))
    }

    fn bump_access(&self, category: Category, memory_id: MemoryId) -> Result<()> {
        let now = Utc::now();
        for (point_id, mut payload) in self.vector.list_by_memory(category, memory_id)? {
            payload.access_count += 1;
            payload.last_accessed_at = now;
            self.vector.update_payload(category, point_id, &payload)?;
        }
        Ok(())
    }

    pub(crate) fn find_category(&self, memory_id: MemoryId) -> Result<Option<Category>> {
        for category in Category::all() {
            if !self.vector.list_by_memory(*category, memory_id)?.is_empty() {
                return Ok(Some(*category));
            }
        }
        Ok(None)
    }
}

fn sort_memories(memories: &mut [ScoredMemory], sort_by: SortBy) {
    memories.sort_by(|a, b| match sort_by {
        SortBy::Relevance => b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal),
        SortBy::Date => b.memory.updated_at.cmp(&a.memory.updated_at),
        SortBy::Importance => b
            .memory
            .importance
            .partial_cmp(&a.memory.importance)
            .unwrap_or(std::cmp::Ordering::Equal),
        SortBy::AccessCount => b.memory.access_count.cmp(&a.memory.access_count),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn manager() -> MemoryManager {
        let storage = Storage::open_in_memory(64).unwrap();
        MemoryManager::new(storage, EngineConfig::dev_default()).unwrap()
    }

    #[tokio::test]
    async fn store_then_recall_finds_short_memory() {
        let mgr = manager();
        let id = mgr
            .store(
                "FastAPI is used for the HTTP layer.",
                Some(Category::Semantic),
                Some(vec!["stack".to_string()]),
                Some(0.8),
                None,
            )
            .await
            .unwrap();

        let results = mgr
            .recall("which web framework do we use?", None, Some(3), None, None, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.id, id);
        assert_eq!(results[0].memory.content, "FastAPI is used for the HTTP layer.");
    }

    #[tokio::test]
    async fn long_content_is_chunked_invisibly() {
        let mgr = manager();
        let text = "x".repeat(2400);
        let id = mgr.store(text.clone(), Some(Category::Semantic), None, None, None).await.unwrap();

        let results = mgr.recall(&"x".repeat(50), None, Some(3), None, None, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.id, id);
        assert_eq!(results[0].memory.content, text);
    }

    #[tokio::test]
    async fn update_content_rewrites_chunks() {
        let mgr = manager();
        let id = mgr
            .store("x".repeat(2400), Some(Category::Semantic), None, None, None)
            .await
            .unwrap();

        let new_content = "y".repeat(700);
        mgr.update(id, Some(new_content.clone()), None, None, None).await.unwrap();

        let chunks = mgr.vector.list_by_memory(Category::Semantic, id).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].1.content, new_content);
    }

    #[tokio::test]
    async fn update_payload_only_preserves_chunk_count() {
        let mgr = manager();
        let id = mgr
            .store("x".repeat(2400), Some(Category::Semantic), None, Some(0.5), None)
            .await
            .unwrap();
        let before = mgr.vector.list_by_memory(Category::Semantic, id).unwrap().len();

        mgr.update(id, None, Some(vec!["updated".to_string()]), Some(0.9), None)
            .await
            .unwrap();

        let after = mgr.vector.list_by_memory(Category::Semantic, id).unwrap();
        assert_eq!(after.len(), before);
        assert!(after.iter().all(|(_, p)| p.tags == vec!["updated".to_string()] && p.importance == 0.9));
    }

    #[tokio::test]
    async fn recall_deduplicates_by_memory_id() {
        let mgr = manager();
        mgr.store("alpha bravo charlie delta", Some(Category::Semantic), None, None, None)
            .await
            .unwrap();

        let results = mgr.recall("alpha bravo", None, Some(10), None, None, None).await.unwrap();
        let mut ids: Vec<_> = results.iter().map(|r| r.memory.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), results.len());
    }
}
