//! Core data model for the memory engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identity of a logical memory, stable across its lifetime.
pub type MemoryId = Uuid;

/// Identity of a physical chunk, distinct from its parent `MemoryId`.
pub type PointId = Uuid;

/// The three typed memory categories; each maps to its own vector collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Episodic,
    Semantic,
    Procedural,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Episodic => "episodic",
            Category::Semantic => "semantic",
            Category::Procedural => "procedural",
        }
    }

    pub fn all() -> &'static [Category] {
        &[Category::Episodic, Category::Semantic, Category::Procedural]
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "episodic" => Ok(Category::Episodic),
            "semantic" => Ok(Category::Semantic),
            "procedural" => Ok(Category::Procedural),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A logical memory as seen by callers of the manager. Reconstructed from
/// chunk 0 of the underlying vector-store points that share its `memory_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub category: Category,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_importance")]
    pub importance: f32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: i64,
}

pub fn default_importance() -> f32 {
    0.5
}

/// Denormalized payload carried by every physical chunk of a memory.
/// Non-content fields MUST be identical across all chunks of one memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub memory_id: MemoryId,
    pub chunk_index: u32,
    pub chunk_count: u32,
    /// Chunk text on non-zero index; the full original content on chunk 0.
    pub content: String,
    pub category: Category,
    pub tags: Vec<String>,
    pub importance: f32,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: i64,
}

impl ChunkPayload {
    /// Construct the logical `Memory` view from a chunk-0 payload.
    pub fn to_memory(&self, id: MemoryId) -> Memory {
        Memory {
            id,
            category: self.category,
            content: self.content.clone(),
            tags: self.tags.clone(),
            importance: self.importance,
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_accessed_at: self.last_accessed_at,
            access_count: self.access_count,
        }
    }
}

/// A physical point in the vector store: one chunk of one memory.
#[derive(Debug, Clone)]
pub struct ChunkPoint {
    pub point_id: PointId,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// Closed enumeration of relation types between memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Causes,
    Fixes,
    Supports,
    Opposes,
    Follows,
    Supersedes,
    Derives,
    PartOf,
    Related,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Causes => "causes",
            RelationType::Fixes => "fixes",
            RelationType::Supports => "supports",
            RelationType::Opposes => "opposes",
            RelationType::Follows => "follows",
            RelationType::Supersedes => "supersedes",
            RelationType::Derives => "derives",
            RelationType::PartOf => "part_of",
            RelationType::Related => "related",
        }
    }

    pub fn all() -> &'static [RelationType] {
        &[
            RelationType::Causes,
            RelationType::Fixes,
            RelationType::Supports,
            RelationType::Opposes,
            RelationType::Follows,
            RelationType::Supersedes,
            RelationType::Derives,
            RelationType::PartOf,
            RelationType::Related,
        ]
    }
}

impl std::str::FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "causes" => Ok(RelationType::Causes),
            "fixes" => Ok(RelationType::Fixes),
            "supports" => Ok(RelationType::Supports),
            "opposes" => Ok(RelationType::Opposes),
            "follows" => Ok(RelationType::Follows),
            "supersedes" => Ok(RelationType::Supersedes),
            "derives" => Ok(RelationType::Derives),
            "part_of" => Ok(RelationType::PartOf),
            "related" => Ok(RelationType::Related),
            other => Err(format!("unknown relation type: {other}")),
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who created an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Creator {
    User,
    Auto,
    System,
}

impl Creator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Creator::User => "user",
            Creator::Auto => "auto",
            Creator::System => "system",
        }
    }

    /// Ranking used to break creator ties during consolidation merges
    /// (user > auto > system).
    pub fn rank(&self) -> u8 {
        match self {
            Creator::User => 2,
            Creator::Auto => 1,
            Creator::System => 0,
        }
    }
}

impl std::str::FromStr for Creator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Creator::User),
            "auto" => Ok(Creator::Auto),
            "system" => Ok(Creator::System),
            other => Err(format!("unknown creator: {other}")),
        }
    }
}

/// A typed, weighted, directed relation between two memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source_id: MemoryId,
    pub target_id: MemoryId,
    pub relation_type: RelationType,
    pub weight: f32,
    pub creator: Creator,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A rejected suggestion triple, suppressing future auto-suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub source_id: MemoryId,
    pub target_id: MemoryId,
    pub relation_type: RelationType,
    pub rejected_at: DateTime<Utc>,
}

/// Direction filter for edge/traversal queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
    #[default]
    Both,
}

/// One step along a path or neighbor result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborHit {
    pub memory_id: MemoryId,
    pub depth: usize,
    pub path: Vec<MemoryId>,
    pub relation_type: RelationType,
}

/// One step of an ordered path returned by `shortest_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathStep {
    pub memory_id: MemoryId,
    pub relation_type: RelationType,
    pub direction: Direction,
}

/// One edge returned by `subgraph`, tagged with the minimum BFS depth (from
/// the subgraph's center) at which either of its endpoints was reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgraphEdge {
    pub edge: Edge,
    pub depth: usize,
}

/// Outcome of `bulk_insert_edges`: a tolerant batch insert where individual
/// bad edges are tallied rather than failing the whole call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkInsertReport {
    pub created: usize,
    pub duplicates: usize,
    pub errors: usize,
}

/// Ephemeral, process-wide ambient metadata injected into subsequent stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkingContext {
    pub project: Option<String>,
    pub client: Option<String>,
    pub file: Option<String>,
}

impl WorkingContext {
    /// Merge this context's fields into caller-supplied metadata without
    /// overwriting keys the caller already set explicitly.
    pub fn merge_into(&self, metadata: &mut HashMap<String, serde_json::Value>) {
        if let Some(project) = &self.project {
            metadata
                .entry("project".to_string())
                .or_insert_with(|| serde_json::Value::String(project.clone()));
        }
        if let Some(client) = &self.client {
            metadata
                .entry("client".to_string())
                .or_insert_with(|| serde_json::Value::String(client.clone()));
        }
        if let Some(file) = &self.file {
            metadata
                .entry("file".to_string())
                .or_insert_with(|| serde_json::Value::String(file.clone()));
        }
    }
}

/// Role an embedding request plays: affects model-specific prefixing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedRole {
    Query,
    Document,
}

/// Sort key for `search` when no query vector is involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Relevance,
    Date,
    Importance,
    AccessCount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_context_does_not_overwrite_explicit_keys() {
        let ctx = WorkingContext {
            project: Some("engine".into()),
            client: None,
            file: None,
        };
        let mut meta = HashMap::new();
        meta.insert(
            "project".to_string(),
            serde_json::Value::String("explicit".into()),
        );
        ctx.merge_into(&mut meta);
        assert_eq!(meta["project"], serde_json::Value::String("explicit".into()));
    }

    #[test]
    fn creator_rank_orders_user_over_auto_over_system() {
        assert!(Creator::User.rank() > Creator::Auto.rank());
        assert!(Creator::Auto.rank() > Creator::System.rank());
    }

    #[test]
    fn category_round_trips_through_str() {
        for c in Category::all() {
            let s = c.as_str();
            assert_eq!(s.parse::<Category>().unwrap(), *c);
        }
    }
}
