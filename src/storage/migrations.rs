//! Database schema for the relational store, embedding cache, and the
//! per-category vector collections.

use rusqlite::Connection;

use crate::error::Result;
use crate::types::Category;

pub const SCHEMA_VERSION: i32 = 1;

pub fn run_migrations(conn: &Connection, vector_dimension: usize) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < SCHEMA_VERSION {
        migrate_v1(conn, vector_dimension)?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [SCHEMA_VERSION],
        )?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection, dimension: usize) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_relations (
            source_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            relation_type TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 1.0,
            creator TEXT NOT NULL DEFAULT 'system',
            created_at TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (source_id, target_id, relation_type)
        );

        CREATE INDEX IF NOT EXISTS idx_memory_relations_source ON memory_relations(source_id);
        CREATE INDEX IF NOT EXISTS idx_memory_relations_target ON memory_relations(target_id);

        CREATE TABLE IF NOT EXISTS rejected_suggestions (
            source_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            relation_type TEXT NOT NULL,
            rejected_at TEXT NOT NULL,
            PRIMARY KEY (source_id, target_id, relation_type)
        );

        CREATE TABLE IF NOT EXISTS embedding_cache (
            key TEXT PRIMARY KEY,
            model_id TEXT NOT NULL,
            dimension INTEGER NOT NULL,
            vector BLOB NOT NULL,
            last_used_at TEXT NOT NULL
        );",
    )?;

    for category in Category::all() {
        create_collection_tables(conn, category.as_str(), dimension)?;
    }

    Ok(())
}

/// Each category gets a `vec0` virtual table holding the raw vector plus a
/// companion table holding point identity and the denormalized payload. The
/// companion table's `rowid` is kept equal to the vector table's rowid so a
/// point can be addressed from either side without a join table.
pub fn create_collection_tables(conn: &Connection, category: &str, dimension: usize) -> Result<()> {
    conn.execute(
        &format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_{category} USING vec0(
                embedding float[{dimension}] distance_metric=cosine
            )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS points_{category} (
                rowid INTEGER PRIMARY KEY,
                point_id TEXT NOT NULL UNIQUE,
                memory_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL,
                content TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                importance REAL NOT NULL DEFAULT 0.5,
                metadata TEXT NOT NULL DEFAULT '{{}}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_accessed_at TEXT NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0
            )"
        ),
        [],
    )?;

    conn.execute(
        &format!("CREATE INDEX IF NOT EXISTS idx_points_{category}_memory ON points_{category}(memory_id)"),
        [],
    )?;

    Ok(())
}
