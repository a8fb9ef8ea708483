//! Graph manager: typed relations between memories, plus suggestion.
//!
//! `link`/`unlink`/`related`/`path` are thin, validating wrappers over the
//! relational store adapter (`storage::graph`). `suggest`/`discover` score
//! candidate pairs with a fixed-weight multi-signal mix: chunk-0 cosine
//! similarity, tag Jaccard overlap, project/client metadata overlap, and
//! co-access recency proximity.

use std::collections::HashSet;

use chrono::Utc;

use super::MemoryManager;
use crate::embedding::cosine_similarity;
use crate::error::{MnemosyneError, Result};
use crate::types::{
    Category, ChunkPayload, Creator, Direction, Edge, Memory, MemoryId, PathStep, RelationType, Rejection, SubgraphEdge,
};

/// `related`/`suggest`/`discover` results ranked for the caller, cheaper
/// than returning raw `NeighborHit`s since callers almost always want the
/// memory payload alongside the graph position.
#[derive(Debug, Clone)]
pub struct RelatedMemory {
    pub memory: Memory,
    pub depth: usize,
    pub relation_type: RelationType,
}

#[derive(Debug, Clone)]
pub struct Suggestion {
    pub source_id: MemoryId,
    pub target_id: MemoryId,
    pub relation_type: RelationType,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoverReport {
    pub suggestions: Vec<Suggestion>,
    pub auto_accepted: usize,
}

const WEIGHT_SIMILARITY: f32 = 0.55;
const WEIGHT_TAG_OVERLAP: f32 = 0.20;
const WEIGHT_METADATA_OVERLAP: f32 = 0.15;
const WEIGHT_RECENCY: f32 = 0.10;

impl MemoryManager {
    /// Create a typed edge. Refuses self-loops; an existing (source, target,
    /// type) edge is returned unchanged rather than erroring, so callers can
    /// `link` idempotently.
    pub async fn link(
        &self,
        source: MemoryId,
        target: MemoryId,
        relation_type: RelationType,
        weight: Option<f32>,
    ) -> Result<()> {
        self.ensure_graph_enabled()?;
        if source == target {
            return Err(MnemosyneError::SelfLoop(source));
        }
        self.find_category(source)?.ok_or(MnemosyneError::NotFound(source))?;
        self.find_category(target)?.ok_or(MnemosyneError::NotFound(target))?;

        let edge = Edge {
            source_id: source,
            target_id: target,
            relation_type,
            weight: weight.unwrap_or(1.0),
            creator: Creator::User,
            created_at: Utc::now(),
            metadata: Default::default(),
        };
        match self.graph.insert_edge(&edge) {
            Ok(()) => Ok(()),
            Err(MnemosyneError::DuplicateEdge { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Remove edges between `source` and `target`; `relation_type` omitted
    /// removes every parallel type between the pair.
    pub async fn unlink(&self, source: MemoryId, target: MemoryId, relation_type: Option<RelationType>) -> Result<()> {
        self.ensure_graph_enabled()?;
        match relation_type {
            Some(rel) => {
                self.graph.delete_edge(source, target, rel)?;
            }
            None => {
                for rel in RelationType::all() {
                    self.graph.delete_edge(source, target, *rel)?;
                }
            }
        }
        Ok(())
    }

    /// Wraps `GraphStore::neighbors`, enriched with memory payloads and
    /// ranked by (inverse depth, edge weight, importance).
    pub async fn related(
        &self,
        memory_id: MemoryId,
        depth: usize,
        relation_types: Option<Vec<RelationType>>,
        direction: Direction,
        limit: Option<usize>,
    ) -> Result<Vec<RelatedMemory>> {
        self.ensure_graph_enabled()?;
        let limit = limit.unwrap_or(self.config.graph.suggest_limit);
        let hits = self.graph.neighbors(memory_id, direction, depth.max(1), relation_types.as_deref(), limit.max(1) * 4)?;

        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(category) = self.find_category(hit.memory_id)? else { continue };
            let Some(payload) = self.chunk0_payload(category, hit.memory_id)? else { continue };
            out.push((hit, payload));
        }

        out.sort_by(|(a_hit, a_payload), (b_hit, b_payload)| {
            a_hit.depth.cmp(&b_hit.depth).then_with(|| {
                b_payload
                    .importance
                    .partial_cmp(&a_payload.importance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });
        out.truncate(limit);

        Ok(out
            .into_iter()
            .map(|(hit, payload)| RelatedMemory {
                memory: payload.to_memory(hit.memory_id),
                depth: hit.depth,
                relation_type: hit.relation_type,
            })
            .collect())
    }

    /// Wraps `GraphStore::shortest_path`.
    pub async fn path(&self, from: MemoryId, to: MemoryId, max_depth: usize) -> Result<Vec<PathStep>> {
        self.ensure_graph_enabled()?;
        Ok(self.graph.shortest_path(from, to, Direction::Both, max_depth)?.unwrap_or_default())
    }

    /// Wraps `GraphStore::subgraph`.
    pub async fn subgraph(&self, center: MemoryId, depth: usize) -> Result<Vec<SubgraphEdge>> {
        self.ensure_graph_enabled()?;
        self.graph.subgraph(center, depth)
    }

    /// Score every other memory in `memory_id`'s category-agnostic universe
    /// as a candidate relation target and return the top `limit` by
    /// confidence, excluding rejected pairs and pairs that already have an
    /// edge of the type about to be suggested (a pair linked as `causes`
    /// can still be suggested as `related`).
    pub async fn suggest(&self, memory_id: MemoryId, limit: Option<usize>) -> Result<Vec<Suggestion>> {
        self.ensure_graph_enabled()?;
        let limit = limit.unwrap_or(self.config.graph.suggest_limit);
        let category = self.find_category(memory_id)?.ok_or(MnemosyneError::NotFound(memory_id))?;
        let anchor_point = self.chunk0_point(category, memory_id)?.ok_or(MnemosyneError::NotFound(memory_id))?;
        let anchor = anchor_point.payload.clone();

        let existing_targets: HashSet<(MemoryId, RelationType)> = self
            .graph
            .list_edges(memory_id, Direction::Out, None)?
            .into_iter()
            .map(|e| (e.target_id, e.relation_type))
            .collect();

        let mut candidates = Vec::new();
        for other_category in Category::all() {
            for (other_id, other_payload, other_point) in self.all_chunk0(*other_category)? {
                if other_id == memory_id {
                    continue;
                }
                let relation_type = suggested_relation_type(&anchor.content, &other_payload.content);
                if existing_targets.contains(&(other_id, relation_type)) {
                    continue;
                }
                if self.graph.is_rejected(memory_id, other_id, relation_type)? {
                    continue;
                }

                let confidence = score_pair(&anchor_point, &anchor, &other_point, &other_payload);
                if confidence < self.config.graph.min_confidence {
                    continue;
                }
                candidates.push(Suggestion { source_id: memory_id, target_id: other_id, relation_type, confidence });
            }
        }

        candidates.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(limit);
        Ok(candidates)
    }

    /// Batch variant of `suggest`: scans memories with no outgoing edge,
    /// collects every suggestion scoring at or above `min_confidence`
    /// (config default if unspecified), and materializes any scoring at or
    /// above `auto_accept_threshold` immediately as `creator=auto` edges.
    pub async fn discover(&self, categories: Option<Vec<Category>>, min_confidence: Option<f32>) -> Result<DiscoverReport> {
        self.ensure_graph_enabled()?;
        let min_confidence = min_confidence.unwrap_or(self.config.graph.min_confidence);
        let categories = categories.unwrap_or_else(|| Category::all().to_vec());

        let mut report = DiscoverReport::default();
        for category in categories {
            for (memory_id, _payload, _point) in self.all_chunk0(category)? {
                if !self.graph.list_edges(memory_id, Direction::Out, None)?.is_empty() {
                    continue;
                }
                for suggestion in self.suggest(memory_id, Some(usize::MAX)).await? {
                    if suggestion.confidence < min_confidence {
                        continue;
                    }
                    if suggestion.confidence >= self.config.graph.auto_accept_threshold {
                        self.accept_suggestion(suggestion.source_id, suggestion.target_id, suggestion.relation_type)
                            .await?;
                        report.auto_accepted += 1;
                    }
                    report.suggestions.push(suggestion);
                }
            }
        }
        tracing::info!(
            found = report.suggestions.len(),
            auto_accepted = report.auto_accepted,
            "discover pass complete"
        );
        Ok(report)
    }

    /// Record a rejection so `suggest`/`discover` stop resurfacing the triple.
    pub async fn reject(&self, source: MemoryId, target: MemoryId, relation_type: RelationType) -> Result<()> {
        self.ensure_graph_enabled()?;
        match self.graph.record_rejection(&Rejection {
            source_id: source,
            target_id: target,
            relation_type,
            rejected_at: Utc::now(),
        }) {
            Ok(()) => Ok(()),
            Err(MnemosyneError::DuplicateRejection { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Materialize a suggested triple as an edge with `creator=auto`.
    pub async fn accept_suggestion(&self, source: MemoryId, target: MemoryId, relation_type: RelationType) -> Result<()> {
        self.ensure_graph_enabled()?;
        let edge = Edge {
            source_id: source,
            target_id: target,
            relation_type,
            weight: 1.0,
            creator: Creator::Auto,
            created_at: Utc::now(),
            metadata: Default::default(),
        };
        match self.graph.insert_edge(&edge) {
            Ok(()) => Ok(()),
            Err(MnemosyneError::DuplicateEdge { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn ensure_graph_enabled(&self) -> Result<()> {
        if self.config.graph.enabled {
            Ok(())
        } else {
            Err(MnemosyneError::NotAvailable("relational layer disabled by configuration".to_string()))
        }
    }

    fn chunk0_point(&self, category: Category, memory_id: MemoryId) -> Result<Option<crate::types::ChunkPoint>> {
        let Some((point_id, _)) = self
            .vector
            .list_by_memory(category, memory_id)?
            .into_iter()
            .find(|(_, p)| p.chunk_index == 0)
        else {
            return Ok(None);
        };
        self.vector.get(category, point_id)
    }

    fn all_chunk0(&self, category: Category) -> Result<Vec<(MemoryId, ChunkPayload, crate::types::ChunkPoint)>> {
        let mut out = Vec::new();
        let mut cursor = crate::vector::ScrollCursor::default();
        loop {
            let (points, next) = self.vector.scroll(category, None, cursor, 200)?;
            for point in points {
                if point.payload.chunk_index != 0 {
                    continue;
                }
                let memory_id = point.payload.memory_id;
                if let Some(full) = self.vector.get(category, point.point_id)? {
                    out.push((memory_id, point.payload, full));
                }
            }
            match next {
                Some(c) => cursor = c,
                None => break,
            }
        }
        Ok(out)
    }
}

/// Fixed signal mix: chunk-0 cosine similarity (0.55), shared-tag Jaccard
/// (0.20), `project`/`client` metadata overlap (0.15), co-access recency
/// proximity (0.10).
fn score_pair(
    anchor_point: &crate::types::ChunkPoint,
    anchor: &ChunkPayload,
    other_point: &crate::types::ChunkPoint,
    other: &ChunkPayload,
) -> f32 {
    let similarity = cosine_similarity(&anchor_point.vector, &other_point.vector);
    let tag_overlap = jaccard(&anchor.tags, &other.tags);
    let metadata_overlap = metadata_field_overlap(anchor, other);
    let recency = recency_proximity(anchor, other);

    (WEIGHT_SIMILARITY * similarity.max(0.0)
        + WEIGHT_TAG_OVERLAP * tag_overlap
        + WEIGHT_METADATA_OVERLAP * metadata_overlap
        + WEIGHT_RECENCY * recency)
        .clamp(0.0, 1.0)
}

fn jaccard(a: &[String], b: &[String]) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let a_set: HashSet<&String> = a.iter().collect();
    let b_set: HashSet<&String> = b.iter().collect();
    let intersection = a_set.intersection(&b_set).count();
    let union = a_set.union(&b_set).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

fn metadata_field_overlap(a: &ChunkPayload, b: &ChunkPayload) -> f32 {
    let fields = ["project", "client"];
    let matches = fields
        .iter()
        .filter(|field| match (a.metadata.get(**field), b.metadata.get(**field)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        })
        .count();
    matches as f32 / fields.len() as f32
}

/// 1.0 when both memories were last accessed at the same instant, decaying
/// toward 0.0 as the gap between `last_accessed_at` timestamps grows; a
/// 7-day gap is treated as no proximity left.
fn recency_proximity(a: &ChunkPayload, b: &ChunkPayload) -> f32 {
    let gap_days = (a.last_accessed_at - b.last_accessed_at).num_seconds().unsigned_abs() as f32 / 86_400.0;
    (1.0 - gap_days / 7.0).clamp(0.0, 1.0)
}

/// Keyword heuristic over both contents, as specified: "fixes"/"resolves" →
/// `fixes`; "because"/"causes" → `causes`; default `related`.
fn suggested_relation_type(a: &str, b: &str) -> RelationType {
    let combined = format!("{} {}", a.to_lowercase(), b.to_lowercase());
    if combined.contains("fixes") || combined.contains("resolves") {
        RelationType::Fixes
    } else if combined.contains("because") || combined.contains("causes") {
        RelationType::Causes
    } else {
        RelationType::Related
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::storage::connection::Storage;

    fn manager() -> MemoryManager {
        let storage = Storage::open_in_memory(64).unwrap();
        MemoryManager::new(storage, EngineConfig::dev_default()).unwrap()
    }

    #[tokio::test]
    async fn link_then_related_finds_neighbor() {
        let mgr = manager();
        let a = mgr.store("alpha content", Some(Category::Semantic), None, None, None).await.unwrap();
        let b = mgr.store("bravo content", Some(Category::Semantic), None, None, None).await.unwrap();

        mgr.link(a, b, RelationType::Causes, None).await.unwrap();
        let related = mgr.related(a, 1, None, Direction::Out, None).await.unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].memory.id, b);
    }

    #[tokio::test]
    async fn link_rejects_self_loop() {
        let mgr = manager();
        let a = mgr.store("solo", Some(Category::Semantic), None, None, None).await.unwrap();
        let err = mgr.link(a, a, RelationType::Related, None).await.unwrap_err();
        assert!(matches!(err, MnemosyneError::SelfLoop(_)));
    }

    #[tokio::test]
    async fn link_is_idempotent_on_duplicate() {
        let mgr = manager();
        let a = mgr.store("alpha", Some(Category::Semantic), None, None, None).await.unwrap();
        let b = mgr.store("bravo", Some(Category::Semantic), None, None, None).await.unwrap();
        mgr.link(a, b, RelationType::Related, None).await.unwrap();
        mgr.link(a, b, RelationType::Related, None).await.unwrap();
        assert_eq!(mgr.graph.list_edges(a, Direction::Out, None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reject_then_suggest_excludes_the_pair() {
        let mgr = manager();
        let a = mgr
            .store("the server fixes a race condition", Some(Category::Semantic), Some(vec!["bug".into()]), None, None)
            .await
            .unwrap();
        let b = mgr
            .store("the server fixes a deadlock", Some(Category::Semantic), Some(vec!["bug".into()]), None, None)
            .await
            .unwrap();

        mgr.reject(a, b, RelationType::Fixes).await.unwrap();
        let suggestions = mgr.suggest(a, Some(5)).await.unwrap();
        assert!(!suggestions.iter().any(|s| s.target_id == b && s.relation_type == RelationType::Fixes));
    }

    #[tokio::test]
    async fn suggest_exclusion_is_scoped_to_the_suggested_relation_type() {
        let mgr = manager();
        let a = mgr
            .store("plain note about alpha", Some(Category::Semantic), Some(vec!["x".into()]), None, None)
            .await
            .unwrap();
        let b = mgr
            .store("plain note about alpha too", Some(Category::Semantic), Some(vec!["x".into()]), None, None)
            .await
            .unwrap();

        // a already has a `causes` edge to b; `related` should still be
        // suggestible since only the `causes` pair is excluded.
        mgr.link(a, b, RelationType::Causes, None).await.unwrap();

        let suggestions = mgr.suggest(a, Some(5)).await.unwrap();
        assert!(suggestions.iter().any(|s| s.target_id == b && s.relation_type == RelationType::Related));
        assert!(!suggestions.iter().any(|s| s.target_id == b && s.relation_type == RelationType::Causes));
    }

    #[test]
    fn suggested_relation_type_detects_fixes_keyword() {
        assert_eq!(suggested_relation_type("this patch fixes the bug", "unrelated"), RelationType::Fixes);
        assert_eq!(suggested_relation_type("plain note", "another plain note"), RelationType::Related);
    }

    #[test]
    fn jaccard_of_disjoint_sets_is_zero() {
        assert_eq!(jaccard(&["a".to_string()], &["b".to_string()]), 0.0);
    }

    #[tokio::test]
    async fn graph_ops_fail_not_available_when_disabled() {
        let storage = Storage::open_in_memory(64).unwrap();
        let mut config = EngineConfig::dev_default();
        config.graph.enabled = false;
        let mgr = MemoryManager::new(storage, config).unwrap();
        let a = mgr.store("alpha", Some(Category::Semantic), None, None, None).await.unwrap();
        let b = mgr.store("bravo", Some(Category::Semantic), None, None, None).await.unwrap();

        let err = mgr.link(a, b, RelationType::Related, None).await.unwrap_err();
        assert!(matches!(err, MnemosyneError::NotAvailable(_)));
    }
}
