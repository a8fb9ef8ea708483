//! Vector store adapter
//!
//! Three collections, one per `Category`, each a `vec0` virtual table
//! (cosine distance metric) paired with a payload table sharing its rowid.
//! `search` overfetches past the KNN index (sqlite-vec cannot apply
//! arbitrary payload predicates inside the index scan) and applies the
//! payload filter and final top-k cut against the joined payload rows.

pub mod filter;

pub use filter::{PayloadFilter, PredicateOp};

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::storage::connection::Storage;
use crate::types::{Category, ChunkPayload, ChunkPoint, MemoryId, PointId};

const PAYLOAD_COLUMNS: &str = "rowid, point_id, memory_id, chunk_index, chunk_count, content, tags, importance, metadata, created_at, updated_at, last_accessed_at, access_count";

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub point_id: PointId,
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Opaque pagination cursor for `scroll`: the last-seen rowid.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrollCursor(pub i64);

pub struct VectorStore {
    storage: Storage,
}

impl VectorStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Insert-or-replace by `point_id`, batched in one transaction.
    pub fn upsert(&self, category: Category, points: &[ChunkPoint]) -> Result<()> {
        tracing::debug!(category = category.as_str(), count = points.len(), "vector upsert");
        if points.is_empty() {
            return Ok(());
        }
        let table = category.as_str();
        self.storage.with_transaction(|tx| {
            for point in points {
                upsert_one(tx, table, point)?;
            }
            Ok(())
        })
    }

    /// Delete by explicit ids, or by payload predicate if `ids` is empty.
    pub fn delete(
        &self,
        category: Category,
        ids: &[PointId],
        filter: Option<&PayloadFilter>,
    ) -> Result<usize> {
        tracing::debug!(category = category.as_str(), ids = ids.len(), "vector delete");
        let table = category.as_str();
        self.storage.with_transaction(|tx| {
            if !ids.is_empty() {
                let mut deleted = 0;
                for id in ids {
                    deleted += delete_by_point_id(tx, table, *id)?;
                }
                Ok(deleted)
            } else if let Some(filter) = filter {
                delete_by_filter(tx, table, filter)
            } else {
                Ok(0)
            }
        })
    }

    pub fn get(&self, category: Category, id: PointId) -> Result<Option<ChunkPoint>> {
        let table = category.as_str();
        self.storage.with_connection(|conn| get_point(conn, table, category, id))
    }

    pub fn get_many(&self, category: Category, ids: &[PointId]) -> Result<Vec<ChunkPoint>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(point) = self.get(category, *id)? {
                out.push(point);
            }
        }
        Ok(out)
    }

    /// All chunks of one memory, ordered by `chunk_index`, without vectors.
    pub fn list_by_memory(&self, category: Category, memory_id: MemoryId) -> Result<Vec<(PointId, ChunkPayload)>> {
        let table = category.as_str();
        self.storage.with_connection(|conn| {
            let sql = format!(
                "SELECT {PAYLOAD_COLUMNS} FROM points_{table} WHERE memory_id = ?1 ORDER BY chunk_index ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows: Vec<(i64, PointId, ChunkPayload)> = stmt
                .query_map(rusqlite::params![memory_id.to_string()], |row| row_to_payload(row, category))?
                .collect::<std::result::Result<_, _>>()?;
            Ok(rows.into_iter().map(|(_, pid, payload)| (pid, payload)).collect())
        })
    }

    /// Delete every chunk belonging to `memory_id`. Idempotent.
    pub fn delete_by_memory(&self, category: Category, memory_id: MemoryId) -> Result<usize> {
        let filter = PayloadFilter::new().with(
            "memory_id",
            PredicateOp::Equals(serde_json::Value::String(memory_id.to_string())),
        );
        self.delete(category, &[], Some(&filter))
    }

    /// Rewrite a point's payload in place, leaving its vector untouched.
    pub fn update_payload(&self, category: Category, point_id: PointId, payload: &ChunkPayload) -> Result<()> {
        let table = category.as_str();
        self.storage.with_connection(|conn| {
            conn.execute(
                &format!(
                    "UPDATE points_{table} SET
                        memory_id = ?2, chunk_index = ?3, chunk_count = ?4, content = ?5,
                        tags = ?6, importance = ?7, metadata = ?8, created_at = ?9,
                        updated_at = ?10, last_accessed_at = ?11, access_count = ?12
                     WHERE point_id = ?1"
                ),
                rusqlite::params![
                    point_id.to_string(),
                    payload.memory_id.to_string(),
                    payload.chunk_index,
                    payload.chunk_count,
                    payload.content,
                    serde_json::to_string(&payload.tags)?,
                    payload.importance,
                    serde_json::to_string(&payload.metadata)?,
                    payload.created_at.to_rfc3339(),
                    payload.updated_at.to_rfc3339(),
                    payload.last_accessed_at.to_rfc3339(),
                    payload.access_count,
                ],
            )?;
            Ok(())
        })
    }

    /// Cosine-similarity KNN search, optionally narrowed by a payload
    /// filter. Returns at most `k` hits sorted by descending score.
    pub fn search(
        &self,
        category: Category,
        query_vec: &[f32],
        k: usize,
        payload_filter: Option<&PayloadFilter>,
        overfetch_factor: usize,
    ) -> Result<Vec<ScoredPoint>> {
        tracing::debug!(category = category.as_str(), k, "vector search");
        if k == 0 {
            return Ok(Vec::new());
        }
        let table = category.as_str();
        let overfetch = k.saturating_mul(overfetch_factor.max(1)).max(k);

        self.storage.with_connection(|conn| {
            let query_blob = encode_vector(query_vec);
            let mut stmt = conn.prepare(&format!(
                "SELECT rowid, distance FROM vec_{table} WHERE embedding MATCH ?1 AND k = ?2 ORDER BY distance"
            ))?;
            let candidates: Vec<(i64, f32)> = stmt
                .query_map(rusqlite::params![query_blob, overfetch as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<std::result::Result<_, _>>()?;

            let mut hits = Vec::new();
            for (rowid, distance) in candidates {
                let row = fetch_payload_row(conn, table, category, rowid, payload_filter)?;
                if let Some((point_id, payload)) = row {
                    hits.push(ScoredPoint {
                        point_id,
                        score: (1.0 - distance).clamp(0.0, 1.0),
                        payload,
                    });
                }
                if hits.len() >= k {
                    break;
                }
            }

            Ok(hits)
        })
    }

    /// Paginated iteration over all points in a collection matching `filter`.
    pub fn scroll(
        &self,
        category: Category,
        filter: Option<&PayloadFilter>,
        cursor: ScrollCursor,
        page_size: usize,
    ) -> Result<(Vec<ChunkPoint>, Option<ScrollCursor>)> {
        let table = category.as_str();
        let (filter_sql, filter_params) = match filter {
            Some(f) => filter::compile(f)?,
            None => ("1=1".to_string(), Vec::new()),
        };

        self.storage.with_connection(|conn| {
            let sql = format!(
                "SELECT {PAYLOAD_COLUMNS} FROM points_{table} WHERE rowid > ? AND ({filter_sql}) ORDER BY rowid ASC LIMIT ?"
            );
            let mut stmt = conn.prepare(&sql)?;
            let limit = page_size as i64;
            let mut params: Vec<&dyn rusqlite::ToSql> = vec![&cursor.0];
            for p in &filter_params {
                params.push(p.as_ref());
            }
            params.push(&limit);

            let mut last_rowid = cursor.0;
            let rows: Vec<(i64, PointId, ChunkPayload)> = stmt
                .query_map(params.as_slice(), |row| row_to_payload(row, category))?
                .collect::<std::result::Result<_, _>>()?;

            let mut points = Vec::with_capacity(rows.len());
            for (rowid, point_id, payload) in rows {
                last_rowid = rowid;
                points.push(ChunkPoint {
                    point_id,
                    vector: Vec::new(),
                    payload,
                });
            }

            let next = if points.len() == page_size {
                Some(ScrollCursor(last_rowid))
            } else {
                None
            };
            Ok((points, next))
        })
    }
}

fn fetch_payload_row(
    conn: &Connection,
    table: &str,
    category: Category,
    rowid: i64,
    filter: Option<&PayloadFilter>,
) -> Result<Option<(PointId, ChunkPayload)>> {
    let (filter_sql, filter_params) = match filter {
        Some(f) => filter::compile(f)?,
        None => ("1=1".to_string(), Vec::new()),
    };
    let sql = format!("SELECT {PAYLOAD_COLUMNS} FROM points_{table} WHERE rowid = ? AND ({filter_sql})");
    let mut params: Vec<&dyn rusqlite::ToSql> = vec![&rowid];
    for p in &filter_params {
        params.push(p.as_ref());
    }
    let result = conn
        .query_row(&sql, params.as_slice(), |row| row_to_payload(row, category))
        .optional()?;
    Ok(result.map(|(_, pid, payload)| (pid, payload)))
}

fn row_to_payload(row: &Row, category: Category) -> rusqlite::Result<(i64, PointId, ChunkPayload)> {
    let rowid: i64 = row.get(0)?;
    let point_id: String = row.get(1)?;
    let memory_id: String = row.get(2)?;
    let chunk_index: u32 = row.get(3)?;
    let chunk_count: u32 = row.get(4)?;
    let content: String = row.get(5)?;
    let tags_json: String = row.get(6)?;
    let importance: f32 = row.get(7)?;
    let metadata_json: String = row.get(8)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    let last_accessed_at: String = row.get(11)?;
    let access_count: i64 = row.get(12)?;

    let point_id: PointId = point_id.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, "bad uuid".into())
    })?;
    let memory_id: MemoryId = memory_id.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, "bad uuid".into())
    })?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_str(&metadata_json).unwrap_or_default();

    let payload = ChunkPayload {
        memory_id,
        chunk_index,
        chunk_count,
        content,
        category,
        tags,
        importance,
        metadata,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
        last_accessed_at: parse_timestamp(&last_accessed_at),
        access_count,
    };

    Ok((rowid, point_id, payload))
}

fn parse_timestamp(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn upsert_one(conn: &Connection, table: &str, point: &ChunkPoint) -> Result<()> {
    delete_by_point_id(conn, table, point.point_id)?;

    let rowid = next_rowid(conn, table)?;
    let vector_blob = encode_vector(&point.vector);
    conn.execute(
        &format!("INSERT INTO vec_{table} (rowid, embedding) VALUES (?1, ?2)"),
        rusqlite::params![rowid, vector_blob],
    )?;

    let payload = &point.payload;
    conn.execute(
        &format!(
            "INSERT INTO points_{table}
                (rowid, point_id, memory_id, chunk_index, chunk_count, content, tags, importance, metadata, created_at, updated_at, last_accessed_at, access_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        rusqlite::params![
            rowid,
            point.point_id.to_string(),
            payload.memory_id.to_string(),
            payload.chunk_index,
            payload.chunk_count,
            payload.content,
            serde_json::to_string(&payload.tags)?,
            payload.importance,
            serde_json::to_string(&payload.metadata)?,
            payload.created_at.to_rfc3339(),
            payload.updated_at.to_rfc3339(),
            payload.last_accessed_at.to_rfc3339(),
            payload.access_count,
        ],
    )?;

    Ok(())
}

fn next_rowid(conn: &Connection, table: &str) -> Result<i64> {
    let max: Option<i64> = conn.query_row(
        &format!("SELECT MAX(rowid) FROM points_{table}"),
        [],
        |r| r.get(0),
    )?;
    Ok(max.unwrap_or(0) + 1)
}

fn delete_by_point_id(conn: &Connection, table: &str, point_id: PointId) -> Result<usize> {
    let rowid: Option<i64> = conn
        .query_row(
            &format!("SELECT rowid FROM points_{table} WHERE point_id = ?1"),
            rusqlite::params![point_id.to_string()],
            |r| r.get(0),
        )
        .optional()?;
    let Some(rowid) = rowid else {
        return Ok(0);
    };
    conn.execute(&format!("DELETE FROM vec_{table} WHERE rowid = ?1"), rusqlite::params![rowid])?;
    let n = conn.execute(
        &format!("DELETE FROM points_{table} WHERE rowid = ?1"),
        rusqlite::params![rowid],
    )?;
    Ok(n)
}

fn delete_by_filter(conn: &Connection, table: &str, filter: &PayloadFilter) -> Result<usize> {
    let (filter_sql, params) = filter::compile(filter)?;
    let mut stmt = conn.prepare(&format!("SELECT rowid FROM points_{table} WHERE {filter_sql}"))?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rowids: Vec<i64> = stmt
        .query_map(param_refs.as_slice(), |r| r.get(0))?
        .collect::<std::result::Result<_, _>>()?;

    for rowid in &rowids {
        conn.execute(&format!("DELETE FROM vec_{table} WHERE rowid = ?1"), rusqlite::params![rowid])?;
        conn.execute(&format!("DELETE FROM points_{table} WHERE rowid = ?1"), rusqlite::params![rowid])?;
    }
    Ok(rowids.len())
}

fn get_point(conn: &Connection, table: &str, category: Category, point_id: PointId) -> Result<Option<ChunkPoint>> {
    let sql = format!("SELECT {PAYLOAD_COLUMNS} FROM points_{table} WHERE point_id = ?1");
    let row = conn
        .query_row(&sql, rusqlite::params![point_id.to_string()], |row| {
            row_to_payload(row, category)
        })
        .optional()?;

    let Some((rowid, pid, payload)) = row else {
        return Ok(None);
    };

    let vector_blob: Vec<u8> = conn.query_row(
        &format!("SELECT embedding FROM vec_{table} WHERE rowid = ?1"),
        rusqlite::params![rowid],
        |r| r.get(0),
    )?;

    Ok(Some(ChunkPoint {
        point_id: pid,
        vector: decode_vector(&vector_blob),
        payload,
    }))
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
    use crate::types::ChunkPayload;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_point(memory_id: MemoryId, chunk_index: u32, chunk_count: u32, vector: Vec<f32>) -> ChunkPoint {
        let now = Utc::now();
        ChunkPoint {
            point_id: Uuid::new_v4(),
            vector,
            payload: ChunkPayload {
                memory_id,
                chunk_index,
                chunk_count,
                content: format!("chunk {chunk_index}"),
                category: Category::Semantic,
                tags: vec!["stack".to_string()],
                importance: 0.8,
                metadata: HashMap::new(),
                created_at: now,
                updated_at: now,
                last_accessed_at: now,
                access_count: 0,
            },
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let store = VectorStore::new(Storage::open_in_memory(4).unwrap());
        let memory_id = Uuid::new_v4();
        let point = sample_point(memory_id, 0, 1, vec![1.0, 0.0, 0.0, 0.0]);
        let point_id = point.point_id;
        store.upsert(Category::Semantic, &[point]).unwrap();

        let got = store.get(Category::Semantic, point_id).unwrap().unwrap();
        assert_eq!(got.payload.memory_id, memory_id);
        assert_eq!(got.vector, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn search_returns_closest_vector_first() {
        let store = VectorStore::new(Storage::open_in_memory(4).unwrap());
        let a = sample_point(Uuid::new_v4(), 0, 1, vec![1.0, 0.0, 0.0, 0.0]);
        let b = sample_point(Uuid::new_v4(), 0, 1, vec![0.0, 1.0, 0.0, 0.0]);
        store.upsert(Category::Semantic, &[a.clone(), b]).unwrap();

        let hits = store
            .search(Category::Semantic, &[1.0, 0.0, 0.0, 0.0], 1, None, 3)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].point_id, a.point_id);
    }

    #[test]
    fn delete_by_id_removes_point() {
        let store = VectorStore::new(Storage::open_in_memory(4).unwrap());
        let point = sample_point(Uuid::new_v4(), 0, 1, vec![1.0, 0.0, 0.0, 0.0]);
        let point_id = point.point_id;
        store.upsert(Category::Semantic, &[point]).unwrap();

        let deleted = store.delete(Category::Semantic, &[point_id], None).unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get(Category::Semantic, point_id).unwrap().is_none());
    }

    #[test]
    fn update_payload_leaves_vector_untouched() {
        let store = VectorStore::new(Storage::open_in_memory(4).unwrap());
        let point = sample_point(Uuid::new_v4(), 0, 1, vec![1.0, 0.0, 0.0, 0.0]);
        let point_id = point.point_id;
        store.upsert(Category::Semantic, &[point.clone()]).unwrap();

        let mut new_payload = point.payload.clone();
        new_payload.access_count = 3;
        store.update_payload(Category::Semantic, point_id, &new_payload).unwrap();

        let got = store.get(Category::Semantic, point_id).unwrap().unwrap();
        assert_eq!(got.payload.access_count, 3);
        assert_eq!(got.vector, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn delete_by_memory_removes_all_its_chunks() {
        let store = VectorStore::new(Storage::open_in_memory(4).unwrap());
        let memory_id = Uuid::new_v4();
        let points = vec![
            sample_point(memory_id, 0, 2, vec![1.0, 0.0, 0.0, 0.0]),
            sample_point(memory_id, 1, 2, vec![0.0, 1.0, 0.0, 0.0]),
        ];
        store.upsert(Category::Semantic, &points).unwrap();

        let deleted = store.delete_by_memory(Category::Semantic, memory_id).unwrap();
        assert_eq!(deleted, 2);
        assert!(store.list_by_memory(Category::Semantic, memory_id).unwrap().is_empty());
    }

    #[test]
    fn scroll_paginates_in_rowid_order() {
        let store = VectorStore::new(Storage::open_in_memory(4).unwrap());
        let points: Vec<_> = (0..5)
            .map(|i| sample_point(Uuid::new_v4(), i, 5, vec![i as f32, 0.0, 0.0, 0.0]))
            .collect();
        store.upsert(Category::Semantic, &points).unwrap();

        let (first_page, cursor) = store
            .scroll(Category::Semantic, None, ScrollCursor::default(), 2)
            .unwrap();
        assert_eq!(first_page.len(), 2);
        let cursor = cursor.expect("more pages remain");
        let (second_page, _) = store.scroll(Category::Semantic, None, cursor, 2).unwrap();
        assert_eq!(second_page.len(), 2);
    }
}
