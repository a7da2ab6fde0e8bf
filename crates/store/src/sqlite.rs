//! SQLite-backed [`KvStore`].
//!
//! One `WITHOUT ROWID` table keyed by BLOB, so SQLite keeps the rows in key
//! order and range scans walk the primary-key b-tree directly.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::{KvStore, Result};

pub struct SqliteKv {
    conn: Mutex<Connection>,
}

impl SqliteKv {
    /// Opens (or creates) the database at `path`, creating parent
    /// directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        tracing::debug!(path = %path.display(), "opened sqlite store");
        Ok(store)
    }

    /// Creates an in-memory database. Useful for testing.
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        // journal_mode answers with a row, so it cannot go through execute_batch.
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::trace!(journal_mode = %mode, "sqlite journal mode");
        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;

            CREATE TABLE IF NOT EXISTS kv (
                key   BLOB PRIMARY KEY,
                value BLOB NOT NULL
            ) WITHOUT ROWID;
            "#,
        )?;
        Ok(())
    }
}

impl KvStore for SqliteKv {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> = self
            .conn
            .lock()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn scan(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT key, value FROM kv WHERE key >= ?1 AND key <= ?2 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![from, to], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn last(&self, from: &[u8], to: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let row: Option<(Vec<u8>, Vec<u8>)> = self
            .conn
            .lock()
            .query_row(
                "SELECT key, value FROM kv WHERE key >= ?1 AND key <= ?2 ORDER BY key DESC LIMIT 1",
                params![from, to],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    fn delete_range(&self, from: &[u8], to: &[u8]) -> Result<usize> {
        let removed = self.conn.lock().execute(
            "DELETE FROM kv WHERE key >= ?1 AND key <= ?2",
            params![from, to],
        )?;
        Ok(removed)
    }
}
