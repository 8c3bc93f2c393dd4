//! Storage abstraction for document persistence.
//!
//! This module defines the [`DocumentStore`] trait which abstracts over the
//! two interchangeable backends: one text file per document on the local
//! filesystem (plus a snapshot slot for the encoded replica state), or a
//! row-per-document SQLite table.
//!
//! The filesystem backend additionally exposes an external-change stream so
//! coordinators can fold edits made by other programs back into the live
//! replica. The table backend simply supplies no stream.

pub mod fs;
pub mod sqlite;
mod watcher;

pub use fs::FsStore;
pub use sqlite::TableStore;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::SyncError;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, SyncError>;

/// What a backend currently holds for one document.
///
/// Either or both fields may be absent: a document may have text but no
/// recovery snapshot, or (after a crash) a snapshot but no text yet.
#[derive(Debug, Clone, Default)]
pub struct DocRecord {
    /// Current rendered text.
    pub text: Option<String>,
    /// Encoded full replica state.
    pub replica_state: Option<Vec<u8>>,
}

/// A modification to a watched file made from outside the process.
#[derive(Debug, Clone)]
pub struct ExternalChange {
    /// Absolute path of the modified file.
    pub path: PathBuf,
    /// New contents, or `None` when the file could not be read (deleted,
    /// permission change, transient I/O failure).
    pub text: Option<String>,
}

/// Trait for document storage backends.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load whatever is currently persisted for `name`.
    async fn load(&self, name: &str) -> StorageResult<DocRecord>;

    /// Atomically persist the rendered text and, when given, the encoded
    /// replica state.
    async fn save(
        &self,
        name: &str,
        text: &str,
        replica_state: Option<&[u8]>,
    ) -> StorageResult<()>;

    /// Identical to [`save`](Self::save); documents shutdown intent at the
    /// call site.
    async fn flush(
        &self,
        name: &str,
        text: &str,
        replica_state: Option<&[u8]>,
    ) -> StorageResult<()> {
        self.save(name, text, replica_state).await
    }

    /// Write only the crash-recovery snapshot for `name`. Backends without
    /// a separate snapshot slot ignore this.
    async fn save_snapshot(&self, _name: &str, _replica_state: &[u8]) -> StorageResult<()> {
        Ok(())
    }

    /// Whether this backend keeps a snapshot slot separate from the saved
    /// document (and thus wants the periodic snapshot timer armed).
    fn snapshot_capable(&self) -> bool {
        false
    }

    /// Subscribe to modifications made from outside the process. Backends
    /// without change notification return `None`.
    fn external_changes(&self) -> Option<broadcast::Receiver<ExternalChange>> {
        None
    }

    /// The on-disk location backing `name`, when the backend has one.
    /// Coordinators use this to match watcher events to documents.
    fn document_path(&self, _name: &str) -> Option<PathBuf> {
        None
    }
}
