//! Core library for mrmd-sync.
//!
//! Provides the building blocks the sync server composes into per-document
//! coordinators:
//!
//! - [`crdt`]: CRDT replica, Y-sync wire protocol, and presence state
//! - [`diff`]: character-level edit scripts between text snapshots
//! - [`storage`]: pluggable document persistence (filesystem or SQLite
//!   table) plus the filesystem change watcher

pub mod crdt;
pub mod diff;
pub mod error;
pub mod storage;

pub use error::{Result, SyncError};

/// Hex-encoded SHA-256 of a text snapshot.
///
/// Used by coordinators to skip no-op writes and to recognize their own
/// renames coming back through the filesystem watcher, and stored as the
/// `content_hash` column by the table backend.
pub fn content_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
