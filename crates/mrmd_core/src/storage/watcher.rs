//! Filesystem change notification with coalescing.
//!
//! Raw notify events arrive on the watcher's own thread and are forwarded
//! into a tokio channel; a coalescing task waits for a quiet interval per
//! path before reading the file and broadcasting the change. Rapid
//! successive writes (editors writing in chunks, rsync, etc.) therefore
//! surface as a single event carrying the settled contents.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use super::ExternalChange;
use crate::error::SyncError;

/// Keeps the underlying notify watcher alive; dropping it stops the stream.
pub(crate) struct WatcherHandle {
    _watcher: notify::RecommendedWatcher,
}

pub(crate) fn spawn(
    base_dir: PathBuf,
    extensions: Vec<String>,
    changes_tx: broadcast::Sender<ExternalChange>,
    settle: Duration,
) -> Result<WatcherHandle, SyncError> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<PathBuf>();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                log::warn!("watcher error: {}", e);
                return;
            }
        };
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        for path in event.paths {
            let _ = event_tx.send(path);
        }
    })
    .map_err(|e| SyncError::Watch(e.to_string()))?;

    watcher
        .watch(&base_dir, RecursiveMode::Recursive)
        .map_err(|e| SyncError::Watch(e.to_string()))?;

    tokio::spawn(coalesce_loop(event_rx, changes_tx, extensions, settle));

    Ok(WatcherHandle { _watcher: watcher })
}

/// A path is worth reporting when it is a document (configured extension)
/// and not one of our own in-flight temp files.
fn is_relevant(path: &Path, extensions: &[String]) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.contains(".tmp.") {
        return false;
    }
    extensions
        .iter()
        .any(|ext| name.ends_with(&format!(".{}", ext)))
}

async fn coalesce_loop(
    mut event_rx: mpsc::UnboundedReceiver<PathBuf>,
    changes_tx: broadcast::Sender<ExternalChange>,
    extensions: Vec<String>,
    settle: Duration,
) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        let next_deadline = pending.values().min().copied();

        tokio::select! {
            changed = event_rx.recv() => {
                match changed {
                    Some(path) => {
                        if is_relevant(&path, &extensions) {
                            pending.insert(path, Instant::now() + settle);
                        }
                    }
                    None => break,
                }
            }
            _ = sleep_until_or_never(next_deadline), if next_deadline.is_some() => {
                let now = Instant::now();
                let due: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in due {
                    pending.remove(&path);
                    let text = match tokio::fs::read_to_string(&path).await {
                        Ok(text) => Some(text),
                        Err(e) => {
                            log::debug!("could not read changed file {}: {}", path.display(), e);
                            None
                        }
                    };
                    // No receivers just means no document is open for it
                    let _ = changes_tx.send(ExternalChange { path, text });
                }
            }
        }
    }
}

async fn sleep_until_or_never(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
