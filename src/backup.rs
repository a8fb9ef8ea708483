//! Backup/restore: a single JSON document capturing every memory, edge,
//! and rejection, round-trippable across processes and (with
//! `include_vectors=false`) across embedding models.
//!
//! `export` does bulk reads across the three-category vector store and the
//! typed relation graph and feeds them into one JSON writer; `import`
//! reverses the process, re-chunking and re-embedding memories exported
//! without vectors.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::chunk::Chunker;
use crate::error::{MnemosyneError, Result};
use crate::manager::MemoryManager;
use crate::types::{
    Category, ChunkPayload, ChunkPoint, Creator, EmbedRole, MemoryId, RelationType,
};

const FORMAT_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMemory {
    pub id: MemoryId,
    pub category: Category,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub importance: f32,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<BackupChunkVector>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupChunkVector {
    pub chunk_index: u32,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEdge {
    pub source_id: MemoryId,
    pub target_id: MemoryId,
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    pub weight: f32,
    pub creator: Creator,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRejection {
    pub source_id: MemoryId,
    pub target_id: MemoryId,
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    pub rejected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupCounts {
    pub memories: usize,
    pub edges: usize,
    pub rejections: usize,
}

/// The full export document (§6 "Export file format").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDocument {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub counts: BackupCounts,
    pub include_vectors: bool,
    pub memories: Vec<BackupMemory>,
    pub edges: Vec<BackupEdge>,
    pub rejections: Vec<BackupRejection>,
}

impl Default for BackupCounts {
    fn default() -> Self {
        Self { memories: 0, edges: 0, rejections: 0 }
    }
}

/// Outcome of `import`.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub memories_created: usize,
    pub memories_skipped: usize,
    pub edges_created: usize,
    pub edges_skipped: usize,
    pub rejections_restored: usize,
    pub errors: Vec<String>,
}

/// Emit one `BackupDocument` covering `categories` (default: all three).
/// Memory content is reconstructed from each memory's chunk-0 payload; with
/// `include_vectors=true`, every chunk's vector is attached so `import` can
/// restore without calling the embedding service again.
pub async fn export(
    manager: &MemoryManager,
    categories: Option<Vec<Category>>,
    include_vectors: bool,
) -> Result<BackupDocument> {
    let categories = categories.unwrap_or_else(|| Category::all().to_vec());
    let vector_store = manager.vector_store();

    let mut memories = Vec::new();
    for category in categories {
        let mut cursor = crate::vector::ScrollCursor::default();
        loop {
            let (points, next) = vector_store.scroll(category, None, cursor, 200)?;
            for point in &points {
                if point.payload.chunk_index != 0 {
                    continue;
                }
                let memory_id = point.payload.memory_id;
                let chunks = if include_vectors {
                    Some(export_chunk_vectors(manager, category, memory_id)?)
                } else {
                    None
                };
                memories.push(to_backup_memory(memory_id, &point.payload, chunks));
            }
            match next {
                Some(c) => cursor = c,
                None => break,
            }
        }
    }

    let edges: Vec<BackupEdge> = manager
        .graph()
        .all_edges()?
        .into_iter()
        .map(|e| BackupEdge {
            source_id: e.source_id,
            target_id: e.target_id,
            relation_type: e.relation_type,
            weight: e.weight,
            creator: e.creator,
            created_at: e.created_at,
            metadata: e.metadata,
        })
        .collect();

    let rejections: Vec<BackupRejection> = manager
        .graph()
        .all_rejections()?
        .into_iter()
        .map(|r| BackupRejection {
            source_id: r.source_id,
            target_id: r.target_id,
            relation_type: r.relation_type,
            rejected_at: r.rejected_at,
        })
        .collect();

    Ok(BackupDocument {
        version: FORMAT_VERSION.to_string(),
        exported_at: Utc::now(),
        counts: BackupCounts {
            memories: memories.len(),
            edges: edges.len(),
            rejections: rejections.len(),
        },
        include_vectors,
        memories,
        edges,
        rejections,
    })
}

fn export_chunk_vectors(
    manager: &MemoryManager,
    category: Category,
    memory_id: MemoryId,
) -> Result<Vec<BackupChunkVector>> {
    let mut out = Vec::new();
    for (point_id, payload) in manager.vector_store().list_by_memory(category, memory_id)? {
        let Some(point) = manager.vector_store().get(category, point_id)? else {
            continue;
        };
        out.push(BackupChunkVector { chunk_index: payload.chunk_index, vector: point.vector });
    }
    out.sort_by_key(|c| c.chunk_index);
    Ok(out)
}

fn to_backup_memory(id: MemoryId, payload: &ChunkPayload, chunks: Option<Vec<BackupChunkVector>>) -> BackupMemory {
    BackupMemory {
        id,
        category: payload.category,
        content: payload.content.clone(),
        tags: payload.tags.clone(),
        importance: payload.importance,
        metadata: payload.metadata.clone(),
        created_at: payload.created_at,
        updated_at: payload.updated_at,
        last_accessed_at: payload.last_accessed_at,
        access_count: payload.access_count,
        chunks,
    }
}

/// Restore a `BackupDocument`. With `skip_existing=true`, a memory whose id
/// is already present is counted and left untouched; otherwise it is
/// overwritten. Chunks carrying vectors are upserted as-is (no re-embed);
/// memories exported with `include_vectors=false` are re-chunked and
/// re-embedded through the same `Chunker`/`EmbeddingClient` path `store`
/// uses. Edges and rejections are inserted afterward so every endpoint they
/// reference already exists; duplicates and self-loops are counted as
/// skips rather than errors.
pub async fn import(manager: &MemoryManager, doc: &BackupDocument, skip_existing: bool) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    for memory in &doc.memories {
        let already_present = manager.find_category(memory.id)?.is_some();
        if already_present && skip_existing {
            report.memories_skipped += 1;
            continue;
        }

        let _guard = manager.locks().acquire(memory.id).await;
        if already_present {
            manager.vector_store().delete_by_memory(memory.category, memory.id)?;
        }

        match restore_memory(manager, memory).await {
            Ok(()) => report.memories_created += 1,
            Err(e) => report.errors.push(format!("memory {}: {e}", memory.id)),
        }
    }

    let edges: Vec<crate::types::Edge> = doc
        .edges
        .iter()
        .map(|edge| crate::types::Edge {
            source_id: edge.source_id,
            target_id: edge.target_id,
            relation_type: edge.relation_type,
            weight: edge.weight,
            creator: edge.creator,
            created_at: edge.created_at,
            metadata: edge.metadata.clone(),
        })
        .collect();
    let bulk = manager.graph().bulk_insert_edges(&edges)?;
    report.edges_created += bulk.created;
    report.edges_skipped += bulk.duplicates + bulk.errors;

    for rejection in &doc.rejections {
        let recorded = manager.graph().record_rejection(&crate::types::Rejection {
            source_id: rejection.source_id,
            target_id: rejection.target_id,
            relation_type: rejection.relation_type,
            rejected_at: rejection.rejected_at,
        });
        match recorded {
            Ok(()) => report.rejections_restored += 1,
            Err(MnemosyneError::DuplicateRejection { .. }) => {}
            Err(e) => report.errors.push(format!("rejection ({}, {}): {e}", rejection.source_id, rejection.target_id)),
        }
    }

    Ok(report)
}

async fn restore_memory(manager: &MemoryManager, memory: &BackupMemory) -> Result<()> {
    let chunker = Chunker::new(&memory.content, &manager.config().chunking);
    let local_chunks = chunker.chunks();

    let vectors_usable = memory
        .chunks
        .as_ref()
        .is_some_and(|chunks| chunks.len() == local_chunks.len());

    let mut points = Vec::with_capacity(local_chunks.len());
    for (i, chunk) in local_chunks.iter().enumerate() {
        let vector = if vectors_usable {
            memory.chunks.as_ref().unwrap()[i].vector.clone()
        } else {
            manager.embed_cached(&chunk.content, EmbedRole::Document).await?
        };
        let content = if chunk.index == 0 { memory.content.clone() } else { chunk.content.clone() };
        points.push(ChunkPoint {
            point_id: Uuid::new_v4(),
            vector,
            payload: ChunkPayload {
                memory_id: memory.id,
                chunk_index: chunk.index,
                chunk_count: local_chunks.len() as u32,
                content,
                category: memory.category,
                tags: memory.tags.clone(),
                importance: memory.importance,
                metadata: memory.metadata.clone(),
                created_at: memory.created_at,
                updated_at: memory.updated_at,
                last_accessed_at: memory.last_accessed_at,
                access_count: memory.access_count,
            },
        });
    }

    manager.vector_store().upsert(memory.category, &points)?;
    Ok(())
}
