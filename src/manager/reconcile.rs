//! Startup consistency reconciliation: scans for chunk/edge drift left
//! behind by a crash mid-write (chunks written before a process died
//! partway through `store`/`update`, or an edge whose endpoint memory was
//! later force-deleted out from under it) and repairs it.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use super::MemoryManager;
use crate::error::Result;
use crate::types::{Category, MemoryId};
use crate::vector::ScrollCursor;

/// Outcome of one `reconcile` pass.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationReport {
    pub orphan_chunks_removed: usize,
    pub dangling_edges_removed: usize,
    pub duration: Duration,
}

impl MemoryManager {
    /// Two checks, run once at startup before the engine takes traffic:
    ///
    /// 1. Orphan chunks: a memory with chunk N > 0 present but chunk 0
    ///    missing is unreadable (nothing can reconstruct its content or
    ///    match it in recall) and is deleted outright.
    /// 2. Dangling edges: an edge whose source or target memory no longer
    ///    has any chunk in the vector store is deleted.
    pub async fn reconcile(&self) -> Result<ReconciliationReport> {
        let started = std::time::Instant::now();
        let mut orphan_chunks_removed = 0;
        let mut known_memory_ids: HashSet<MemoryId> = HashSet::new();

        for category in Category::all() {
            let category = *category;
            let mut has_chunk_zero: HashMap<MemoryId, bool> = HashMap::new();
            let mut seen: HashSet<MemoryId> = HashSet::new();
            let mut cursor = ScrollCursor::default();
            loop {
                let (points, next) = self.vector.scroll(category, None, cursor, 200)?;
                for point in &points {
                    let memory_id = point.payload.memory_id;
                    seen.insert(memory_id);
                    if point.payload.chunk_index == 0 {
                        has_chunk_zero.insert(memory_id, true);
                    } else {
                        has_chunk_zero.entry(memory_id).or_insert(false);
                    }
                }
                match next {
                    Some(next_cursor) => cursor = next_cursor,
                    None => break,
                }
            }

            for (memory_id, has_zero) in &has_chunk_zero {
                if *has_zero {
                    known_memory_ids.insert(*memory_id);
                } else {
                    tracing::warn!(%memory_id, %category, "orphan chunks with no chunk 0, deleting");
                    self.vector.delete_by_memory(category, *memory_id)?;
                    orphan_chunks_removed += 1;
                }
            }
        }

        let mut dangling_edges_removed = 0;
        for edge in self.graph.all_edges()? {
            let source_ok = known_memory_ids.contains(&edge.source_id);
            let target_ok = known_memory_ids.contains(&edge.target_id);
            if !source_ok || !target_ok {
                tracing::warn!(
                    source = %edge.source_id,
                    target = %edge.target_id,
                    relation_type = %edge.relation_type,
                    "dangling edge references a missing memory, deleting"
                );
                self.graph.delete_edge(edge.source_id, edge.target_id, edge.relation_type)?;
                dangling_edges_removed += 1;
            }
        }

        let report = ReconciliationReport {
            orphan_chunks_removed,
            dangling_edges_removed,
            duration: started.elapsed(),
        };
        tracing::info!(
            orphan_chunks_removed = report.orphan_chunks_removed,
            dangling_edges_removed = report.dangling_edges_removed,
            "startup reconciliation complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::storage::connection::Storage;
    use crate::types::{Direction, RelationType};

    fn manager() -> MemoryManager {
        let storage = Storage::open_in_memory(64).unwrap();
        MemoryManager::new(storage, EngineConfig::dev_default()).unwrap()
    }

    #[tokio::test]
    async fn reconcile_is_a_no_op_on_a_healthy_store() {
        let mgr = manager();
        let a = mgr.store("alpha content", Some(Category::Semantic), None, None, None).await.unwrap();
        let b = mgr.store("bravo content", Some(Category::Semantic), None, None, None).await.unwrap();
        mgr.link(a, b, RelationType::Related, None).await.unwrap();

        let report = mgr.reconcile().await.unwrap();
        assert_eq!(report.orphan_chunks_removed, 0);
        assert_eq!(report.dangling_edges_removed, 0);
    }

    #[tokio::test]
    async fn reconcile_deletes_orphan_chunks_missing_chunk_zero() {
        let mgr = manager();
        let id = mgr.store("x".repeat(2000), Some(Category::Semantic), None, None, None).await.unwrap();
        let chunks = mgr.vector.list_by_memory(Category::Semantic, id).unwrap();
        assert!(chunks.len() > 1, "need a multi-chunk memory for this test to be meaningful");

        let (chunk_zero_point, _) = chunks.iter().find(|(_, p)| p.chunk_index == 0).unwrap().clone();
        mgr.vector.delete(Category::Semantic, &[chunk_zero_point], None).unwrap();

        let report = mgr.reconcile().await.unwrap();
        assert_eq!(report.orphan_chunks_removed, 1);
        assert!(mgr.vector.list_by_memory(Category::Semantic, id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn reconcile_deletes_edges_pointing_at_missing_memories() {
        let mgr = manager();
        let a = mgr.store("alpha content", Some(Category::Semantic), None, None, None).await.unwrap();
        let b = mgr.store("bravo content", Some(Category::Semantic), None, None, None).await.unwrap();
        mgr.link(a, b, RelationType::Related, None).await.unwrap();

        mgr.vector.delete_by_memory(Category::Semantic, b).unwrap();

        let report = mgr.reconcile().await.unwrap();
        assert_eq!(report.dangling_edges_removed, 1);
        assert!(mgr.graph.list_edges(a, Direction::Both, None).unwrap().is_empty());
    }
}
