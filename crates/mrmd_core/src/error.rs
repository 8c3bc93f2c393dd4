use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for mrmd-sync core operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// General error for any kind of I/O issue not otherwise documented here.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A failed document read from the filesystem backend.
    ///
    /// Can occur due to:
    /// - insufficient permissions
    /// - locking/concurrent access
    /// - resource issues
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to be read
        path: PathBuf,
        /// std::io error that caused this error
        source: std::io::Error,
    },

    /// A failed document write on the filesystem backend.
    ///
    /// The coordinator keeps its last-persisted hash unchanged when it sees
    /// this, so the next debounce firing retries the write.
    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        /// Path to the file that failed to be written
        path: PathBuf,
        /// std::io error that caused this error
        source: std::io::Error,
    },

    /// A document on disk exceeds the configured maximum size.
    ///
    /// Treated like a load failure by callers, but kept distinct so the
    /// reason is visible in logs.
    #[error("File '{path}' is {size} bytes, exceeding the {limit} byte limit")]
    Oversize {
        /// Path to the oversized file
        path: PathBuf,
        /// Actual size on disk
        size: u64,
        /// Configured maximum
        limit: u64,
    },

    /// CRDT-level failure (undecodable update, failed apply).
    #[error("CRDT error: {0}")]
    Crdt(String),

    /// Malformed wire frame or sub-message.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error from the SQLite table backend.
    #[error("Storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The filesystem watcher could not be started.
    #[error("Watcher error: {0}")]
    Watch(String),
}

/// Result type alias for mrmd-sync core operations.
pub type Result<T> = std::result::Result<T, SyncError>;
