//! Document backends for the local store.
//!
//! A backend is a synchronous key → document map. Keys are collection names
//! (`assessmentHistory`, `emergencyContacts`, ...) plus a handful of scalar
//! flags; documents are JSON text. The typed layer in [`crate::store`] owns
//! serialization and write ordering; backends only persist bytes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{LocalResult, LocalStoreError};

/// Synchronous document persistence.
pub trait LocalBackend: Send + Sync {
    /// Read a document. `None` if the key was never written or was deleted.
    fn read(&self, key: &str) -> LocalResult<Option<String>>;

    /// Create or replace a document.
    fn write(&self, key: &str, body: &str) -> LocalResult<()>;

    /// Delete a document. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> LocalResult<()>;

    /// All stored keys, sorted.
    fn keys(&self) -> LocalResult<Vec<String>>;
}

// ============================================================================
// SQLite
// ============================================================================

const SCHEMA: &str = r#"
-- One row per collection document or scalar flag
CREATE TABLE IF NOT EXISTS documents (
    key TEXT PRIMARY KEY,
    body TEXT NOT NULL,
    updated_at INTEGER DEFAULT (unixepoch())
);
"#;

/// Durable on-device document store backed by SQLite.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> LocalResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> LocalResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl LocalBackend for SqliteBackend {
    fn read(&self, key: &str) -> LocalResult<Option<String>> {
        let conn = self.conn.lock();
        let body = conn
            .query_row(
                "SELECT body FROM documents WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(body)
    }

    fn write(&self, key: &str, body: &str) -> LocalResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (key, body) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET body = excluded.body, updated_at = unixepoch()",
            params![key, body],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> LocalResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM documents WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn keys(&self) -> LocalResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key FROM documents ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let keys = rows.collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

// ============================================================================
// Memory
// ============================================================================

/// In-memory document store.
///
/// Used for tests and for sessions that opt out of on-device persistence.
/// All data is lost when dropped. Writes can be made to fail on demand to
/// exercise quota/corruption handling.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    documents: RwLock<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `write`/`delete` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Store raw text under a key, bypassing the typed layer.
    ///
    /// Lets tests plant corrupt documents.
    pub fn insert_raw(&self, key: &str, body: &str) {
        self.documents.write().insert(key.to_string(), body.to_string());
    }

    fn check_writable(&self) -> LocalResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LocalStoreError::backend("quota exceeded"));
        }
        Ok(())
    }
}

impl LocalBackend for MemoryBackend {
    fn read(&self, key: &str) -> LocalResult<Option<String>> {
        Ok(self.documents.read().get(key).cloned())
    }

    fn write(&self, key: &str, body: &str) -> LocalResult<()> {
        self.check_writable()?;
        self.documents.write().insert(key.to_string(), body.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> LocalResult<()> {
        self.check_writable()?;
        self.documents.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> LocalResult<Vec<String>> {
        let mut keys: Vec<String> = self.documents.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
