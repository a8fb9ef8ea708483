//! Consolidation engine: merge near-duplicates, decay importance, forget
//! low-value memories.
//!
//! A pairwise similarity scan over chunk-0 cosine similarity, gated by age
//! and importance, decides which candidates merge into which survivors.
//! `consolidate`/`forget`/`decay` share a mutually-exclusive maintenance
//! lease — a bare `tokio::sync::Mutex<()>` — so only one runs at a time.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use super::MemoryManager;
use crate::embedding::cosine_similarity;
use crate::error::{MnemosyneError, Result};
use crate::types::{Category, ChunkPayload, Direction, Edge, MemoryId, PointId};
use crate::vector::ScrollCursor;

/// Outcome of one maintenance pass. `is_preview` is set when `dry_run` was
/// requested: counts reflect what *would* happen, nothing was mutated.
#[derive(Debug, Clone)]
pub struct ConsolidationReport {
    pub operation: String,
    pub merged_count: usize,
    pub forgotten_count: usize,
    pub updated_count: usize,
    pub total_processed: usize,
    pub duration: Duration,
    pub is_preview: bool,
}

struct Survivor {
    memory_id: MemoryId,
    vector: Vec<f32>,
    payload: ChunkPayload,
}

impl MemoryManager {
    /// Scroll `category` ascending by `created_at` (ties broken by memory id)
    /// and merge each memory into the earliest sufficiently-similar survivor
    /// seen so far. A merge concatenates content with sentence dedup, unions
    /// tags, takes the max importance, deep-merges metadata (arrays unioned),
    /// redirects every edge touching the absorbed memory onto the survivor,
    /// and deletes the absorbed memory's chunks.
    pub async fn consolidate(
        &self,
        category: Category,
        similarity_threshold: Option<f32>,
        min_importance: Option<f32>,
        max_age_days: Option<i64>,
        dry_run: bool,
    ) -> Result<ConsolidationReport> {
        let _lease = self
            .maintenance_lease
            .try_lock()
            .map_err(|_| MnemosyneError::NotAvailable("a maintenance operation is already running".to_string()))?;
        let started = std::time::Instant::now();

        let threshold = similarity_threshold.unwrap_or(self.config.consolidation.similarity_threshold);
        let min_importance = min_importance.unwrap_or(self.config.consolidation.min_importance);
        let max_age_days = max_age_days.unwrap_or(self.config.consolidation.max_age_days);

        let mut entries = self.scroll_chunk0(category)?;
        entries.sort_by(|a, b| a.2.created_at.cmp(&b.2.created_at).then_with(|| a.0.to_string().cmp(&b.0.to_string())));
        let total_processed = entries.len();

        let mut survivors: Vec<Survivor> = Vec::new();
        let mut merged_count = 0;
        let mut updated_count = 0;

        for (memory_id, point_id, payload) in entries {
            let Some(point) = self.vector.get(category, point_id)? else {
                continue;
            };

            let match_idx = survivors
                .iter()
                .position(|s| cosine_similarity(&point.vector, &s.vector) >= threshold);

            let Some(idx) = match_idx else {
                survivors.push(Survivor { memory_id, vector: point.vector, payload });
                continue;
            };

            let age_diff = (payload.created_at - survivors[idx].payload.created_at).num_days().abs();
            let eligible = age_diff <= max_age_days && payload.importance <= min_importance;
            if !eligible {
                survivors.push(Survivor { memory_id, vector: point.vector, payload });
                continue;
            }

            merged_count += 1;
            if dry_run {
                continue;
            }

            let survivor_id = survivors[idx].memory_id;
            let merged_content = dedupe_sentences(&survivors[idx].payload.content, &payload.content);
            let merged_tags = union_tags(&survivors[idx].payload.tags, &payload.tags);
            let merged_importance = survivors[idx].payload.importance.max(payload.importance);
            let merged_metadata = merge_metadata(&survivors[idx].payload.metadata, &payload.metadata);

            let _guard = self.locks.acquire(memory_id).await;
            self.redirect_edges(memory_id, survivor_id)?;

            let patch: HashMap<String, Option<Value>> =
                merged_metadata.iter().map(|(k, v)| (k.clone(), Some(v.clone()))).collect();
            self.update(survivor_id, Some(merged_content), Some(merged_tags), Some(merged_importance), Some(patch))
                .await?;
            self.vector.delete_by_memory(category, memory_id)?;
            updated_count += 1;

            if let Some((new_point_id, new_payload)) = self.chunk0_entry(category, survivor_id)? {
                if let Some(new_point) = self.vector.get(category, new_point_id)? {
                    survivors[idx] = Survivor { memory_id: survivor_id, vector: new_point.vector, payload: new_payload };
                }
            }
        }

        let report = ConsolidationReport {
            operation: "consolidate".to_string(),
            merged_count,
            forgotten_count: 0,
            updated_count,
            total_processed,
            duration: started.elapsed(),
            is_preview: dry_run,
        };
        tracing::info!(
            category = %category,
            merged = report.merged_count,
            total = report.total_processed,
            dry_run,
            "consolidation pass complete"
        );
        Ok(report)
    }

    /// Delete memories untouched and unimportant long enough to be noise:
    /// `last_accessed_at` older than `max_age_days`, `importance` below
    /// `min_importance`, never accessed, and with no incident edges.
    pub async fn forget(
        &self,
        category: Category,
        max_age_days: Option<i64>,
        min_importance: Option<f32>,
        dry_run: bool,
    ) -> Result<ConsolidationReport> {
        let _lease = self
            .maintenance_lease
            .try_lock()
            .map_err(|_| MnemosyneError::NotAvailable("a maintenance operation is already running".to_string()))?;
        let started = std::time::Instant::now();

        let max_age_days = max_age_days.unwrap_or(self.config.consolidation.max_age_days);
        let min_importance = min_importance.unwrap_or(self.config.consolidation.min_importance);
        let now = Utc::now();

        let entries = self.scroll_chunk0(category)?;
        let total_processed = entries.len();
        let mut forgotten_count = 0;

        for (memory_id, _point_id, payload) in entries {
            let age_days = (now - payload.last_accessed_at).num_days();
            if age_days < max_age_days || payload.importance >= min_importance || payload.access_count != 0 {
                continue;
            }
            if !self.graph.list_edges(memory_id, Direction::Both, None)?.is_empty() {
                continue;
            }

            forgotten_count += 1;
            if !dry_run {
                let _guard = self.locks.acquire(memory_id).await;
                self.vector.delete_by_memory(category, memory_id)?;
            }
        }

        let report = ConsolidationReport {
            operation: "forget".to_string(),
            merged_count: 0,
            forgotten_count,
            updated_count: 0,
            total_processed,
            duration: started.elapsed(),
            is_preview: dry_run,
        };
        tracing::info!(
            category = %category,
            forgotten = report.forgotten_count,
            total = report.total_processed,
            dry_run,
            "forget pass complete"
        );
        Ok(report)
    }

    /// Exponentially decay importance for memories idle longer than
    /// `half_life_days`: `importance *= 0.5^(age_days/half_life_days)`,
    /// clamped to `[0,1]`. Touches `updated_at` on every chunk changed.
    pub async fn decay(&self, category: Category, half_life_days: f64, dry_run: bool) -> Result<ConsolidationReport> {
        let _lease = self
            .maintenance_lease
            .try_lock()
            .map_err(|_| MnemosyneError::NotAvailable("a maintenance operation is already running".to_string()))?;
        let started = std::time::Instant::now();
        let now = Utc::now();

        let entries = self.scroll_chunk0(category)?;
        let total_processed = entries.len();
        let mut updated_count = 0;

        for (memory_id, _point_id, payload) in entries {
            let age_days = (now - payload.last_accessed_at).num_seconds() as f64 / 86_400.0;
            if age_days <= half_life_days {
                continue;
            }

            let decayed = ((payload.importance as f64) * 0.5f64.powf(age_days / half_life_days)).clamp(0.0, 1.0) as f32;
            updated_count += 1;
            if dry_run {
                continue;
            }

            let _guard = self.locks.acquire(memory_id).await;
            for (point_id, mut chunk_payload) in self.vector.list_by_memory(category, memory_id)? {
                chunk_payload.importance = decayed;
                chunk_payload.updated_at = now;
                self.vector.update_payload(category, point_id, &chunk_payload)?;
            }
        }

        let report = ConsolidationReport {
            operation: "decay".to_string(),
            merged_count: 0,
            forgotten_count: 0,
            updated_count,
            total_processed,
            duration: started.elapsed(),
            is_preview: dry_run,
        };
        tracing::info!(
            category = %category,
            updated = report.updated_count,
            total = report.total_processed,
            dry_run,
            "decay pass complete"
        );
        Ok(report)
    }

    /// Redirect every edge touching `from` onto `to`; `(source,target,type)`
    /// collisions keep the higher weight, ties broken by creator rank.
    fn redirect_edges(&self, from: MemoryId, to: MemoryId) -> Result<()> {
        for edge in self.graph.list_edges(from, Direction::Both, None)? {
            self.graph.delete_edge(edge.source_id, edge.target_id, edge.relation_type)?;

            let new_source = if edge.source_id == from { to } else { edge.source_id };
            let new_target = if edge.target_id == from { to } else { edge.target_id };
            if new_source == new_target {
                continue;
            }

            let redirected = Edge {
                source_id: new_source,
                target_id: new_target,
                relation_type: edge.relation_type,
                weight: edge.weight,
                creator: edge.creator,
                created_at: edge.created_at,
                metadata: edge.metadata,
            };

            match self.graph.insert_edge(&redirected) {
                Ok(()) => {}
                Err(MnemosyneError::DuplicateEdge { .. }) => {
                    let existing = self
                        .graph
                        .list_edges(new_source, Direction::Out, Some(redirected.relation_type))?
                        .into_iter()
                        .find(|e| e.target_id == new_target);
                    if let Some(existing) = existing {
                        let replace = redirected.weight > existing.weight
                            || (redirected.weight == existing.weight && redirected.creator.rank() > existing.creator.rank());
                        if replace {
                            self.graph.delete_edge(existing.source_id, existing.target_id, existing.relation_type)?;
                            self.graph.insert_edge(&redirected)?;
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn scroll_chunk0(&self, category: Category) -> Result<Vec<(MemoryId, PointId, ChunkPayload)>> {
        let mut out = Vec::new();
        let mut cursor = ScrollCursor::default();
        loop {
            let (points, next) = self.vector.scroll(category, None, cursor, 200)?;
            for point in points {
                if point.payload.chunk_index == 0 {
                    out.push((point.payload.memory_id, point.point_id, point.payload));
                }
            }
            match next {
                Some(c) => cursor = c,
                None => break,
            }
        }
        Ok(out)
    }

    fn chunk0_entry(&self, category: Category, memory_id: MemoryId) -> Result<Option<(PointId, ChunkPayload)>> {
        Ok(self
            .vector
            .list_by_memory(category, memory_id)?
            .into_iter()
            .find(|(_, p)| p.chunk_index == 0))
    }
}

/// Concatenate `base` and `addition`, dropping sentences from `addition`
/// that already appear (case-insensitively) in `base`.
fn dedupe_sentences(base: &str, addition: &str) -> String {
    let mut seen: HashSet<String> = split_sentences(base).map(|s| s.to_lowercase()).collect();

    let mut merged = base.trim_end().to_string();
    let mut appended = false;
    for sentence in split_sentences(addition) {
        let key = sentence.to_lowercase();
        if !seen.insert(key) {
            continue;
        }
        merged.push_str(if appended { ". " } else { "\n\n" });
        merged.push_str(sentence);
        appended = true;
    }
    if appended {
        merged.push('.');
    }
    merged
}

fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?']).map(str::trim).filter(|s| !s.is_empty())
}

fn union_tags(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = a.to_vec();
    for tag in b {
        if !out.contains(tag) {
            out.push(tag.clone());
        }
    }
    out
}

fn merge_metadata(base: &HashMap<String, Value>, incoming: &HashMap<String, Value>) -> HashMap<String, Value> {
    let mut merged = base.clone();
    for (key, incoming_value) in incoming {
        let next = match merged.remove(key) {
            Some(existing) => merge_value(existing, incoming_value.clone()),
            None => incoming_value.clone(),
        };
        merged.insert(key.clone(), next);
    }
    merged
}

fn merge_value(base: Value, incoming: Value) -> Value {
    match (base, incoming) {
        (Value::Array(mut a), Value::Array(b)) => {
            for item in b {
                if !a.contains(&item) {
                    a.push(item);
                }
            }
            Value::Array(a)
        }
        (Value::Object(a), Value::Object(b)) => {
            let a_map: HashMap<String, Value> = a.into_iter().collect();
            let b_map: HashMap<String, Value> = b.into_iter().collect();
            Value::Object(merge_metadata(&a_map, &b_map).into_iter().collect())
        }
        (_, incoming) => incoming,
    }
}
