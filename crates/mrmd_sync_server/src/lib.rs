//! mrmd-sync server
//!
//! A real-time collaborative synchronization hub for markdown documents.
//! Remote editors speak a Y-sync protocol over WebSockets; the hub routes
//! each socket to a per-document coordinator that owns the CRDT replica,
//! debounced persistence, crash-recovery snapshots, and reconciliation with
//! edits made to the backing store from outside the process.
//!
//! ## Environment Variables
//!
//! - `MRMD_DIR`: base directory for documents (default: ./docs)
//! - `MRMD_HOST`: bind host (default: 0.0.0.0)
//! - `MRMD_PORT`: bind port (default: 3333)
//! - `MRMD_DEBOUNCE_MS`: write debounce interval (default: 1000)
//! - `MRMD_MAX_CONNECTIONS`: total socket cap (default: 256)
//! - `MRMD_MAX_CONNECTIONS_PER_DOC`: per-document socket cap (default: 32)
//! - `MRMD_MAX_MESSAGE_SIZE`: largest accepted frame (default: 1 MiB)
//! - `MRMD_MAX_FILE_SIZE`: largest loadable document (default: 10 MiB)
//! - `MRMD_PING_INTERVAL_MS`: heartbeat interval (default: 30000)
//! - `MRMD_DOC_CLEANUP_DELAY_MS`: idle eviction delay (default: 30000)
//! - `MRMD_DANGEROUSLY_ALLOW_SYSTEM_PATHS`: opt in to system base dirs
//! - `MRMD_LOG_LEVEL`: debug|info|warn|error (default: info)
//! - `MRMD_PERSIST_YJS_STATE`: keep replica state on disk (default: true)
//! - `MRMD_SNAPSHOT_INTERVAL_MS`: snapshot cadence (default: 30000)
//! - `MRMD_PATH_PREFIX`: prefix stripped from request paths
//! - `MRMD_EXTENSIONS`: recognized document extensions (default: md)

pub mod config;
pub mod handlers;
pub mod hooks;
pub mod lock;
pub mod metrics;
pub mod server;
pub mod sync;

pub use config::Config;
pub use hooks::{AllowAll, ConnectRequest, ServerHooks};
pub use server::{SyncServer, create_server};
