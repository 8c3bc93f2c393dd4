//! Filesystem storage backend.
//!
//! One text file per document under a base directory, plus a snapshot slot
//! per document holding the base64-encoded replica state in a
//! process-private state directory derived from the base directory. All
//! writes go through a sibling temp file followed by an atomic rename, so a
//! reader (or the watcher) never observes a half-written document.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::broadcast;
use walkdir::WalkDir;

use super::watcher;
use super::{DocRecord, DocumentStore, ExternalChange, StorageResult};
use crate::error::SyncError;

/// Temp files from crashed predecessors older than this are removed at
/// startup even when their PID cannot be probed.
const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

/// Quiet interval the watcher waits for before emitting a change, so rapid
/// successive writes coalesce into one event.
const WATCH_SETTLE: Duration = Duration::from_millis(200);

/// Filesystem-backed document store.
pub struct FsStore {
    base_dir: PathBuf,
    /// `<tempDir>/mrmd-sync-<first-12-of-sha256(resolve(base_dir))>`
    state_dir: PathBuf,
    /// Recognized document extensions; the first is appended to names that
    /// carry none.
    extensions: Vec<String>,
    max_file_size: u64,
    changes_tx: broadcast::Sender<ExternalChange>,
    watcher: std::sync::Mutex<Option<watcher::WatcherHandle>>,
}

impl FsStore {
    /// Open a store over `base_dir`, creating it and the state directory as
    /// needed, and garbage-collecting temp files left by dead processes.
    pub fn open(
        base_dir: impl Into<PathBuf>,
        extensions: Vec<String>,
        max_file_size: u64,
    ) -> StorageResult<Self> {
        let base_dir: PathBuf = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        let base_dir = base_dir.canonicalize()?;

        let state_dir = state_dir_for(&base_dir);
        std::fs::create_dir_all(&state_dir)?;

        let extensions = if extensions.is_empty() {
            vec!["md".to_string()]
        } else {
            extensions
        };

        let store = Self {
            base_dir,
            state_dir,
            extensions,
            max_file_size,
            changes_tx: broadcast::channel(256).0,
            watcher: std::sync::Mutex::new(None),
        };
        store.clean_stale_temp_files();
        Ok(store)
    }

    /// The resolved base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// The process-private state directory (snapshot slots, instance lock).
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Start watching the base directory for external modifications.
    /// Must be called from within a tokio runtime. Idempotent.
    pub fn watch(&self) -> StorageResult<()> {
        let mut guard = self.watcher.lock().unwrap();
        if guard.is_some() {
            return Ok(());
        }
        let handle = watcher::spawn(
            self.base_dir.clone(),
            self.extensions.clone(),
            self.changes_tx.clone(),
            WATCH_SETTLE,
        )?;
        *guard = Some(handle);
        Ok(())
    }

    /// Map a document name to its backing file.
    ///
    /// Rooted names are used verbatim; relative names live under the base
    /// directory with the default extension appended when absent.
    pub fn resolve_path(&self, name: &str) -> PathBuf {
        if name.starts_with('/') {
            return PathBuf::from(name);
        }
        if self.has_known_extension(name) {
            self.base_dir.join(name)
        } else {
            self.base_dir
                .join(format!("{}.{}", name, self.extensions[0]))
        }
    }

    /// Snapshot slot for a document: the name with separators flattened,
    /// inside the state directory.
    pub fn snapshot_path(&self, name: &str) -> PathBuf {
        let flattened: String = name
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.state_dir.join(format!("{}.snapshot", flattened))
    }

    fn has_known_extension(&self, name: &str) -> bool {
        self.extensions
            .iter()
            .any(|ext| name.ends_with(&format!(".{}", ext)))
    }

    /// Remove temp files whose embedded PID no longer names a live process
    /// or whose embedded timestamp is older than [`STALE_TEMP_AGE`].
    fn clean_stale_temp_files(&self) {
        for dir in [&self.base_dir, &self.state_dir] {
            for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                let Some((pid, written_ms)) = parse_temp_suffix(&name) else {
                    continue;
                };
                let age = unix_millis().saturating_sub(written_ms);
                if !pid_alive(pid) || age > STALE_TEMP_AGE.as_millis() as u64 {
                    log::info!("removing stale temp file {}", entry.path().display());
                    if let Err(e) = std::fs::remove_file(entry.path()) {
                        log::warn!(
                            "failed to remove stale temp file {}: {}",
                            entry.path().display(),
                            e
                        );
                    }
                }
            }
        }
    }

    async fn write_atomic(&self, target: &Path, bytes: &[u8]) -> StorageResult<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SyncError::FileWrite {
                    path: target.to_path_buf(),
                    source,
                })?;
        }

        let temp = temp_path_for(target);
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|source| SyncError::FileWrite {
                path: temp.clone(),
                source,
            })?;

        if let Err(source) = tokio::fs::rename(&temp, target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(SyncError::FileWrite {
                path: target.to_path_buf(),
                source,
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for FsStore {
    async fn load(&self, name: &str) -> StorageResult<DocRecord> {
        let path = self.resolve_path(name);

        let text = match tokio::fs::metadata(&path).await {
            Ok(meta) => {
                if meta.len() > self.max_file_size {
                    return Err(SyncError::Oversize {
                        path,
                        size: meta.len(),
                        limit: self.max_file_size,
                    });
                }
                match tokio::fs::read_to_string(&path).await {
                    Ok(text) => Some(text),
                    Err(source) => return Err(SyncError::FileRead { path, source }),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => return Err(SyncError::FileRead { path, source }),
        };

        // Snapshot hydration is best-effort: a corrupt or missing slot must
        // never prevent the document from opening.
        let replica_state = match tokio::fs::read(self.snapshot_path(name)).await {
            Ok(encoded) => match BASE64.decode(encoded.trim_ascii()) {
                Ok(state) => Some(state),
                Err(e) => {
                    log::warn!("discarding undecodable snapshot for '{}': {}", name, e);
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                log::warn!("failed to read snapshot for '{}': {}", name, e);
                None
            }
        };

        Ok(DocRecord {
            text,
            replica_state,
        })
    }

    async fn save(
        &self,
        name: &str,
        text: &str,
        replica_state: Option<&[u8]>,
    ) -> StorageResult<()> {
        let path = self.resolve_path(name);
        self.write_atomic(&path, text.as_bytes()).await?;
        if let Some(state) = replica_state {
            self.save_snapshot(name, state).await?;
        }
        Ok(())
    }

    async fn save_snapshot(&self, name: &str, replica_state: &[u8]) -> StorageResult<()> {
        let encoded = BASE64.encode(replica_state);
        self.write_atomic(&self.snapshot_path(name), encoded.as_bytes())
            .await
    }

    fn snapshot_capable(&self) -> bool {
        true
    }

    fn external_changes(&self) -> Option<broadcast::Receiver<ExternalChange>> {
        Some(self.changes_tx.subscribe())
    }

    fn document_path(&self, name: &str) -> Option<PathBuf> {
        Some(self.resolve_path(name))
    }
}

/// The state directory for a base directory:
/// `<tempDir>/mrmd-sync-<first-12-of-sha256(resolve(base))>`.
pub fn state_dir_for(resolved_base: &Path) -> PathBuf {
    let digest = crate::content_hash(&resolved_base.to_string_lossy());
    std::env::temp_dir().join(format!("mrmd-sync-{}", &digest[..12]))
}

/// Sibling temp path for an atomic write: `<target>.tmp.<pid>.<unix-ms>`.
fn temp_path_for(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(format!(".tmp.{}.{}", std::process::id(), unix_millis()));
    PathBuf::from(name)
}

/// Parse `<pid>, <unix-ms>` out of a `*.tmp.<pid>.<ms>` file name.
fn parse_temp_suffix(file_name: &str) -> Option<(u32, u64)> {
    let (_, suffix) = file_name.rsplit_once(".tmp.")?;
    let (pid, millis) = suffix.split_once('.')?;
    Some((pid.parse().ok()?, millis.parse().ok()?))
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Whether `pid` names a live process on this host.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    // kill(pid, 0) probes without signalling; EPERM still means the process
    // exists, only ESRCH means it is gone.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> FsStore {
        FsStore::open(dir, vec!["md".to_string()], 10 * 1024 * 1024).unwrap()
    }

    #[test]
    fn test_resolve_path_appends_default_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());

        let resolved = store.resolve_path("notes/hello");
        assert!(resolved.ends_with("notes/hello.md"));
        assert!(resolved.starts_with(store.base_dir()));
    }

    #[test]
    fn test_resolve_path_keeps_known_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        assert!(store.resolve_path("hello.md").ends_with("hello.md"));
        assert!(!store.resolve_path("hello.md").ends_with("hello.md.md"));
    }

    #[test]
    fn test_rooted_names_are_used_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        assert_eq!(
            store.resolve_path("/var/data/doc"),
            PathBuf::from("/var/data/doc")
        );
    }

    #[test]
    fn test_snapshot_path_flattens_separators() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let snap = store.snapshot_path("notes/deep/file");
        assert!(snap.starts_with(store.state_dir()));
        assert!(snap.ends_with("notes_deep_file.snapshot"));
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());

        store
            .save("doc", "# Hello\n", Some(b"state-bytes"))
            .await
            .unwrap();

        let record = store.load("doc").await.unwrap();
        assert_eq!(record.text.as_deref(), Some("# Hello\n"));
        assert_eq!(record.replica_state.as_deref(), Some(&b"state-bytes"[..]));
    }

    #[tokio::test]
    async fn test_load_missing_document_is_empty_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());

        let record = store.load("nothing-here").await.unwrap();
        assert!(record.text.is_none());
        assert!(record.replica_state.is_none());
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());

        for i in 0..5 {
            store
                .save("atomic", &format!("revision {}", i), None)
                .await
                .unwrap();
        }

        let leftovers: Vec<_> = std::fs::read_dir(store.base_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty(), "temp files left: {:?}", leftovers);
    }

    #[tokio::test]
    async fn test_oversize_load_is_a_distinct_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsStore::open(tmp.path(), vec!["md".to_string()], 8).unwrap();

        std::fs::write(tmp.path().join("big.md"), "way more than eight bytes").unwrap();
        match store.load("big").await {
            Err(SyncError::Oversize { size, limit, .. }) => {
                assert!(size > limit);
            }
            other => panic!("expected oversize error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());

        store.save("doc", "text", None).await.unwrap();
        std::fs::write(store.snapshot_path("doc"), "!!! not base64 !!!").unwrap();

        let record = store.load("doc").await.unwrap();
        assert_eq!(record.text.as_deref(), Some("text"));
        assert!(record.replica_state.is_none());
    }

    #[test]
    fn test_parse_temp_suffix() {
        assert_eq!(
            parse_temp_suffix("doc.md.tmp.1234.1700000000000"),
            Some((1234, 1_700_000_000_000))
        );
        assert_eq!(parse_temp_suffix("doc.md"), None);
        assert_eq!(parse_temp_suffix("doc.md.tmp.x.y"), None);
    }

    #[test]
    fn test_stale_temp_files_are_collected_at_open() {
        let tmp = tempfile::tempdir().unwrap();

        // Dead PID: far above any default pid_max
        let dead = tmp.path().join("doc.md.tmp.1999999999.1700000000000");
        std::fs::write(&dead, "junk").unwrap();

        // Live PID (ours) with a fresh timestamp: must survive
        let fresh = tmp.path().join(format!(
            "doc.md.tmp.{}.{}",
            std::process::id(),
            unix_millis()
        ));
        std::fs::write(&fresh, "in flight").unwrap();

        let _store = store_in(tmp.path());

        assert!(!dead.exists(), "dead-pid temp file should be removed");
        assert!(fresh.exists(), "live recent temp file should survive");
    }

    #[test]
    fn test_own_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
    }
}
