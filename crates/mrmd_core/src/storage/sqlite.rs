//! SQLite table storage backend.
//!
//! Row-per-document persistence for deployments without a writable document
//! tree: one table keyed by `(user, project, path)` holding both the
//! rendered text and the opaque replica state. Saves are a single upsert
//! statement. This backend has no external-change stream; the default
//! trait implementation supplies the empty source.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, params};

use super::{DocRecord, DocumentStore, StorageResult};
use crate::content_hash;

/// SQLite-backed document store.
///
/// The `user` and `project` halves of the composite key are fixed per
/// store; the document name supplies the `path` column.
pub struct TableStore {
    conn: Mutex<Connection>,
    user: String,
    project: String,
}

impl TableStore {
    /// Open (or create) a database file.
    pub fn open(
        path: impl AsRef<Path>,
        user: impl Into<String>,
        project: impl Into<String>,
    ) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, user, project)
    }

    /// In-memory store for tests.
    pub fn in_memory(
        user: impl Into<String>,
        project: impl Into<String>,
    ) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, user, project)
    }

    fn with_connection(
        conn: Connection,
        user: impl Into<String>,
        project: impl Into<String>,
    ) -> StorageResult<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            user: user.into(),
            project: project.into(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                user TEXT NOT NULL,
                project TEXT NOT NULL,
                path TEXT NOT NULL,
                opaque_state BLOB,
                content_text TEXT,
                content_hash TEXT,
                byte_size INTEGER,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user, project, path)
            );
            "#,
        )?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for TableStore {
    async fn load(&self, name: &str) -> StorageResult<DocRecord> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT content_text, opaque_state FROM documents
                 WHERE user = ? AND project = ? AND path = ?",
                params![self.user, self.project, name],
                |row| {
                    Ok(DocRecord {
                        text: row.get(0)?,
                        replica_state: row.get(1)?,
                    })
                },
            )
            .ok()
            .unwrap_or_default();
        Ok(record)
    }

    async fn save(
        &self,
        name: &str,
        text: &str,
        replica_state: Option<&[u8]>,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp_millis();

        conn.execute(
            "INSERT OR REPLACE INTO documents
             (user, project, path, opaque_state, content_text, content_hash, byte_size, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                self.user,
                self.project,
                name,
                replica_state,
                text,
                content_hash(text),
                text.len() as i64,
                now
            ],
        )?;
        Ok(())
    }
}
