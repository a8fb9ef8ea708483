//! Database connection management with WAL mode support
//!
//! A single SQLite connection backs both the relational store and the
//! vector collections (via the `sqlite-vec` extension) — the storage
//! layer never opens two separate databases.

use std::path::Path;
use std::sync::{Arc, Once};

use parking_lot::Mutex;
use rusqlite::Connection;

use super::migrations::run_migrations;
use crate::error::Result;

static VEC_EXTENSION_REGISTERED: Once = Once::new();

/// Register the `sqlite-vec` extension with SQLite's auto-extension
/// mechanism once per process. Safe to call repeatedly.
fn ensure_vec_extension_registered() {
    VEC_EXTENSION_REGISTERED.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<
            *const (),
            unsafe extern "C" fn(),
        >(
            sqlite_vec::sqlite3_vec_init as *const ()
        )));
    });
}

/// Storage engine wrapping a single SQLite connection.
pub struct Storage {
    db_path: String,
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open or create a database file, running migrations for the given
    /// vector dimension.
    pub fn open(db_path: &str, vector_dimension: usize) -> Result<Self> {
        ensure_vec_extension_registered();

        let conn = if db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open(db_path)?
        };

        configure_pragmas(&conn, db_path)?;
        run_migrations(&conn, vector_dimension)?;

        Ok(Self {
            db_path: db_path.to_string(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory(vector_dimension: usize) -> Result<Self> {
        Self::open(":memory:", vector_dimension)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    pub fn checkpoint(&self) -> Result<()> {
        if self.db_path != ":memory:" {
            let conn = self.conn.lock();
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        }
        Ok(())
    }

    pub fn vacuum(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("VACUUM;")?;
        Ok(())
    }

    pub fn db_size(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let size: i64 = conn.query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )?;
        Ok(size)
    }
}

impl Clone for Storage {
    fn clone(&self) -> Self {
        Self {
            db_path: self.db_path.clone(),
            conn: self.conn.clone(),
        }
    }
}

fn configure_pragmas(conn: &Connection, db_path: &str) -> Result<()> {
    if db_path == ":memory:" {
        conn.execute_batch(
            "PRAGMA foreign_keys=ON;
             PRAGMA temp_store=MEMORY;",
        )?;
    } else {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA wal_autocheckpoint=1000;
             PRAGMA busy_timeout=30000;
             PRAGMA cache_size=-64000;
             PRAGMA temp_store=MEMORY;
             PRAGMA foreign_keys=ON;",
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_runs_migrations() {
        let storage = Storage::open_in_memory(64).unwrap();
        assert_eq!(storage.db_path(), ":memory:");
        storage
            .with_connection(|conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE name = 'memory_relations'",
                    [],
                    |r| r.get(0),
                )?;
                assert_eq!(count, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn vector_collection_tables_exist_per_category() {
        let storage = Storage::open_in_memory(64).unwrap();
        storage
            .with_connection(|conn| {
                for category in crate::types::Category::all() {
                    let count: i64 = conn.query_row(
                        &format!(
                            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'vec_{}'",
                            category.as_str()
                        ),
                        [],
                        |r| r.get(0),
                    )?;
                    assert_eq!(count, 1);
                }
                Ok(())
            })
            .unwrap();
    }
}
