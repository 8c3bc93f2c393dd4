//! The hub: multiplexes sockets onto per-document coordinators.
//!
//! The hub owns the coordinator index, admission limits, and the routing of
//! filesystem watcher events to the coordinator that owns each path. It
//! keeps no global mutable state; several hubs may coexist in one process
//! as long as they bind distinct ports and base directories.

pub mod doc;
pub mod names;

pub use doc::{AttachOutcome, ClientHandle, DocCommand};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{RwLock, broadcast, mpsc, oneshot};
use tracing::{info, warn};

use mrmd_core::storage::{DocumentStore, ExternalChange};

use crate::config::Config;
use crate::hooks::ServerHooks;
use crate::metrics::Metrics;

/// Handle to one live coordinator.
#[derive(Clone)]
pub struct DocHandle {
    pub name: String,
    /// Backing file in filesystem mode.
    pub path: Option<PathBuf>,
    /// Live client count, maintained by the coordinator.
    pub connections: Arc<AtomicUsize>,
    pub(crate) cmd_tx: mpsc::UnboundedSender<DocCommand>,
    pub(crate) epoch: u64,
}

impl DocHandle {
    pub fn send(&self, cmd: DocCommand) -> bool {
        self.cmd_tx.send(cmd).is_ok()
    }
}

/// One row of the `/stats` documents listing.
#[derive(Debug, serde::Serialize)]
pub struct DocStat {
    pub name: String,
    pub connections: usize,
    pub path: String,
}

/// Per-process multiplexer owning all document coordinators.
pub struct SyncHub {
    config: Arc<Config>,
    store: Arc<dyn DocumentStore>,
    hooks: Arc<dyn ServerHooks>,
    metrics: Arc<Metrics>,
    docs: RwLock<HashMap<String, DocHandle>>,
    /// Resolved backing path -> document name, for watcher routing.
    paths: RwLock<HashMap<PathBuf, String>>,
    next_epoch: AtomicU64,
    shutting_down: AtomicBool,
}

impl SyncHub {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn DocumentStore>,
        hooks: Arc<dyn ServerHooks>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            hooks,
            metrics,
            docs: RwLock::new(HashMap::new()),
            paths: RwLock::new(HashMap::new()),
            next_epoch: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Begin routing external-change events, when the backend has any.
    pub fn start(self: &Arc<Self>) {
        if let Some(rx) = self.store.external_changes() {
            tokio::spawn(route_external_changes(self.clone(), rx));
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub(crate) fn hooks(&self) -> &Arc<dyn ServerHooks> {
        &self.hooks
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Get the coordinator for a document, creating it when absent.
    /// Creation is race-free: concurrent callers for the same name observe
    /// exactly one coordinator.
    pub async fn get_or_create(self: &Arc<Self>, name: &str) -> DocHandle {
        {
            let docs = self.docs.read().await;
            if let Some(handle) = docs.get(name) {
                return handle.clone();
            }
        }

        let mut docs = self.docs.write().await;
        // Double-check after acquiring the write lock
        if let Some(handle) = docs.get(name) {
            return handle.clone();
        }

        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst);
        let handle = doc::spawn(self.clone(), name.to_string(), epoch);
        docs.insert(name.to_string(), handle.clone());
        if let Some(path) = &handle.path {
            self.paths
                .write()
                .await
                .insert(path.clone(), name.to_string());
        }
        info!(doc = name, "created coordinator");
        handle
    }

    /// Look up a live coordinator without creating one.
    pub async fn get(&self, name: &str) -> Option<DocHandle> {
        self.docs.read().await.get(name).cloned()
    }

    /// Drop a coordinator from the index. The epoch guards against removing
    /// a successor that reused the name after an eviction raced a connect.
    pub(crate) async fn remove_doc(&self, name: &str, epoch: u64) {
        let mut docs = self.docs.write().await;
        if docs.get(name).is_some_and(|h| h.epoch == epoch)
            && let Some(handle) = docs.remove(name)
        {
            if let Some(path) = handle.path {
                self.paths.write().await.remove(&path);
            }
            info!(doc = name, "removed coordinator");
        }
    }

    /// Flush and tear down every coordinator. Idempotent; later calls (and
    /// repeated signals) return once the first run completes nothing more.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down, flushing open documents");

        let handles: Vec<DocHandle> = self.docs.read().await.values().cloned().collect();
        let mut acks = Vec::with_capacity(handles.len());
        for handle in handles {
            let (reply, ack) = oneshot::channel();
            if handle.send(DocCommand::Close { reply }) {
                acks.push(ack);
            }
        }
        for ack in acks {
            let _ = ack.await;
        }
        info!("all documents flushed");
    }

    /// Snapshot of open documents for `/stats`.
    pub async fn document_stats(&self) -> Vec<DocStat> {
        self.docs
            .read()
            .await
            .values()
            .map(|handle| DocStat {
                name: handle.name.clone(),
                connections: handle.connections.load(Ordering::SeqCst),
                path: handle
                    .path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| handle.name.clone()),
            })
            .collect()
    }
}

/// Deliver watcher events to the coordinator owning each path.
async fn route_external_changes(hub: Arc<SyncHub>, mut rx: broadcast::Receiver<ExternalChange>) {
    loop {
        match rx.recv().await {
            Ok(change) => {
                let name = { hub.paths.read().await.get(&change.path).cloned() };
                let Some(name) = name else {
                    warn!(path = %change.path.display(),
                          "external change for a document that is not open, dropping");
                    continue;
                };
                if let Some(handle) = hub.get(&name).await {
                    handle.send(DocCommand::External { text: change.text });
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "external change stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
