//! Persistent embedding cache
//!
//! Key: `hash(normalized_text) ⊕ model_id ⊕ dimension`. Lives in the
//! `embedding_cache` table of the same SQLite connection the relational and
//! vector stores use, so it survives process restart without opening a
//! second database file. `put` is idempotent; `get` never returns a vector
//! whose stored dimension differs from the requested one.

use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::storage::connection::Storage;

/// Stable cache key: sha256 over normalized text, model id, and dimension.
pub fn cache_key(normalized_text: &str, model_id: &str, dimension: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_text.as_bytes());
    hasher.update([0u8]);
    hasher.update(model_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(dimension.to_le_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Default)]
pub struct EmbeddingCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// SQLite-backed embedding cache, sharing its connection with `Storage`.
pub struct EmbeddingCache {
    storage: Storage,
    max_entries: usize,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
}

impl EmbeddingCache {
    pub fn new(storage: Storage, max_entries: usize) -> Self {
        Self {
            storage,
            max_entries,
            hits: std::sync::atomic::AtomicU64::new(0),
            misses: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Storage::open_in_memory(0)?, 0))
    }

    /// Look up a cached vector. Returns `None` on a miss or a stored
    /// dimension mismatch (the latter should never happen given `cache_key`
    /// folds dimension in, but is checked defensively at the boundary).
    pub fn get(&self, key: &str, dimension: usize) -> Result<Option<Vec<f32>>> {
        self.storage.with_connection(|conn| {
            let row: Option<(i64, Vec<u8>)> = conn
                .query_row(
                    "SELECT dimension, vector FROM embedding_cache WHERE key = ?1",
                    params![key],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;

            match row {
                Some((stored_dim, blob)) if stored_dim as usize == dimension => {
                    self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    conn.execute(
                        "UPDATE embedding_cache SET last_used_at = ?1 WHERE key = ?2",
                        params![chrono::Utc::now().to_rfc3339(), key],
                    )?;
                    Ok(Some(decode_vector(&blob)))
                }
                _ => {
                    self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    Ok(None)
                }
            }
        })
    }

    /// Insert or replace the cached vector for `key`. Idempotent.
    pub fn put(&self, key: &str, model_id: &str, dimension: usize, vector: &[f32]) -> Result<()> {
        self.storage.with_connection(|conn| {
            conn.execute(
                "INSERT INTO embedding_cache (key, model_id, dimension, vector, last_used_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                    model_id = excluded.model_id,
                    dimension = excluded.dimension,
                    vector = excluded.vector,
                    last_used_at = excluded.last_used_at",
                params![
                    key,
                    model_id,
                    dimension as i64,
                    encode_vector(vector),
                    chrono::Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;
        if self.max_entries > 0 {
            self.evict_over_capacity()?;
        }
        Ok(())
    }

    /// Explicitly bump `last_used_at` without a full `get`.
    pub fn touch(&self, key: &str) -> Result<()> {
        self.storage.with_connection(|conn| {
            conn.execute(
                "UPDATE embedding_cache SET last_used_at = ?1 WHERE key = ?2",
                params![chrono::Utc::now().to_rfc3339(), key],
            )?;
            Ok(())
        })
    }

    pub fn size(&self) -> Result<usize> {
        self.storage.with_connection(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM embedding_cache", [], |r| r.get(0))?;
            Ok(count as usize)
        })
    }

    /// Evict the `n` least-recently-used entries.
    pub fn evict(&self, n: usize) -> Result<usize> {
        if n == 0 {
            return Ok(0);
        }
        self.storage.with_connection(|conn| {
            let evicted = conn.execute(
                "DELETE FROM embedding_cache WHERE key IN (
                    SELECT key FROM embedding_cache ORDER BY last_used_at ASC LIMIT ?1
                )",
                params![n as i64],
            )?;
            Ok(evicted)
        })
    }

    fn evict_over_capacity(&self) -> Result<()> {
        let size = self.size()?;
        if size > self.max_entries {
            self.evict(size - self.max_entries)?;
        }
        Ok(())
    }

    pub fn stats(&self) -> EmbeddingCacheStats {
        EmbeddingCacheStats {
            hits: self.hits.load(std::sync::atomic::Ordering::Relaxed),
            misses: self.misses.load(std::sync::atomic::Ordering::Relaxed),
            entries: self.size().unwrap_or(0),
        }
    }
}

fn encode_vector(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for f in v {
        out.extend_from_slice(&f.to_le_bytes());
    }
    out
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let cache = EmbeddingCache::in_memory().unwrap();
        let key = cache_key("hello world", "dev-hash", 4);
        cache.put(&key, "dev-hash", 4, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let got = cache.get(&key, 4).unwrap().unwrap();
        assert_eq!(got, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn get_rejects_dimension_mismatch() {
        let cache = EmbeddingCache::in_memory().unwrap();
        let key = cache_key("hello world", "dev-hash", 4);
        cache.put(&key, "dev-hash", 4, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!(cache.get(&key, 8).unwrap().is_none());
    }

    #[test]
    fn put_is_idempotent() {
        let cache = EmbeddingCache::in_memory().unwrap();
        let key = cache_key("hello world", "dev-hash", 2);
        cache.put(&key, "dev-hash", 2, &[1.0, 2.0]).unwrap();
        cache.put(&key, "dev-hash", 2, &[1.0, 2.0]).unwrap();
        assert_eq!(cache.size().unwrap(), 1);
    }

    #[test]
    fn evict_removes_least_recently_used() {
        let cache = EmbeddingCache::in_memory().unwrap();
        for i in 0..3 {
            let key = cache_key(&format!("text-{i}"), "dev-hash", 2);
            cache.put(&key, "dev-hash", 2, &[i as f32, i as f32]).unwrap();
        }
        assert_eq!(cache.size().unwrap(), 3);
        cache.evict(1).unwrap();
        assert_eq!(cache.size().unwrap(), 2);
    }

    #[test]
    fn same_key_returns_identical_vector_without_recompute() {
        let cache = EmbeddingCache::in_memory().unwrap();
        let key = cache_key("identical input", "dev-hash", 3);
        cache.put(&key, "dev-hash", 3, &[0.1, 0.2, 0.3]).unwrap();
        let first = cache.get(&key, 3).unwrap().unwrap();
        let second = cache.get(&key, 3).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.stats().hits, 2);
    }
}
