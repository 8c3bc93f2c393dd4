//! Per-document coordinator.
//!
//! One coordinator owns each active document: its replica, presence state,
//! connected clients, and every storage side effect. All of that state is
//! touched by exactly one task, fed by a single command channel, so the
//! replica never sees concurrent mutation and storage writes for a document
//! are naturally serialized. Fan-out goes through per-socket outbound
//! queues, so a slow client cannot stall the coordinator.
//!
//! Three producers of change meet here:
//! - client frames (sync + presence messages),
//! - the filesystem watcher (external edits folded in as edit scripts),
//! - timers (debounced writes, periodic snapshots, idle eviction).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant, Interval};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mrmd_core::content_hash;
use mrmd_core::crdt::{Frame, Presence, Replica, SyncMessage, encode_presence_frame};
use mrmd_core::diff;
use mrmd_core::storage::DocRecord;

use super::{DocHandle, SyncHub};

/// Commands consumed by a coordinator task.
pub enum DocCommand {
    /// Register a socket. The reply says whether it was admitted.
    Attach {
        client: ClientHandle,
        reply: oneshot::Sender<AttachOutcome>,
    },
    /// Unregister a socket.
    Detach { client_id: Uuid },
    /// A binary frame received from a registered socket.
    Inbound { client_id: Uuid, data: Vec<u8> },
    /// The watched backing file changed from outside the process.
    External { text: Option<String> },
    /// Result of the deferred initial load (table backend).
    HydrationLoaded { record: Option<DocRecord> },
    /// Flush and tear down; replied to once persistence finished.
    Close { reply: oneshot::Sender<()> },
}

/// A connected socket as the coordinator sees it.
pub struct ClientHandle {
    pub id: Uuid,
    /// Encoded frames queued for this socket.
    pub outbound: mpsc::UnboundedSender<Vec<u8>>,
}

/// Admission result for [`DocCommand::Attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Accepted,
    AtCapacity,
    ShuttingDown,
}

struct ClientState {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    /// Awareness client ids this socket has announced, removed from
    /// presence when it disconnects.
    awareness_ids: HashSet<u64>,
}

pub(super) struct DocCoordinator {
    hub: Arc<SyncHub>,
    name: String,
    epoch: u64,
    replica: Replica,
    presence: Presence,
    clients: HashMap<Uuid, ClientState>,
    /// Mirrored into the hub's handle for /stats.
    connections: Arc<AtomicUsize>,
    /// Hash of the most recently persisted text; skips no-op writes and
    /// recognizes our own renames echoed back by the watcher.
    last_persisted_hash: Option<String>,
    /// Set while folding an external edit into the replica; the resulting
    /// update events must not schedule a write.
    writing_in: bool,
    /// Set while a storage write is in flight.
    writing_out: bool,
    debounce_deadline: Option<Instant>,
    idle_deadline: Option<Instant>,
    shutting_down: bool,
    /// Handle back into our own command queue for deferred hydration.
    self_tx: mpsc::UnboundedSender<DocCommand>,
}

/// Create the coordinator task for a document and hand back its channel.
pub(super) fn spawn(hub: Arc<SyncHub>, name: String, epoch: u64) -> DocHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let connections = Arc::new(AtomicUsize::new(0));
    let path = hub.store().document_path(&name);

    let coordinator = DocCoordinator {
        hub: hub.clone(),
        name: name.clone(),
        epoch,
        replica: Replica::new(),
        presence: Presence::new(),
        clients: HashMap::new(),
        connections: connections.clone(),
        last_persisted_hash: None,
        writing_in: false,
        writing_out: false,
        debounce_deadline: None,
        idle_deadline: None,
        shutting_down: false,
        self_tx: cmd_tx.clone(),
    };
    tokio::spawn(coordinator.run(cmd_rx));

    DocHandle {
        name,
        path,
        connections,
        cmd_tx,
        epoch,
    }
}

impl DocCoordinator {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<DocCommand>) {
        self.open().await;

        let mut snapshot_timer = self.make_snapshot_timer();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(DocCommand::Attach { client, reply }) => {
                        let _ = reply.send(self.attach(client));
                    }
                    Some(DocCommand::Detach { client_id }) => self.detach(client_id),
                    Some(DocCommand::Inbound { client_id, data }) => {
                        self.handle_frame(client_id, &data);
                    }
                    Some(DocCommand::External { text }) => self.handle_external(text),
                    Some(DocCommand::HydrationLoaded { record }) => self.finish_hydration(record),
                    Some(DocCommand::Close { reply }) => {
                        self.shutting_down = true;
                        self.flush(true).await;
                        let _ = reply.send(());
                        break;
                    }
                    None => break,
                },
                _ = sleep_until_or_never(self.debounce_deadline),
                    if self.debounce_deadline.is_some() =>
                {
                    self.debounce_deadline = None;
                    self.flush(false).await;
                }
                _ = sleep_until_or_never(self.idle_deadline),
                    if self.idle_deadline.is_some() =>
                {
                    info!(doc = %self.name, "idle timeout, evicting");
                    self.flush(true).await;
                    break;
                }
                _ = tick(&mut snapshot_timer), if snapshot_timer.is_some() => {
                    self.write_snapshot().await;
                }
            }
        }

        self.hub.remove_doc(&self.name, self.epoch).await;
        info!(doc = %self.name, "coordinator closed");
    }

    // ==================== Construction ====================

    async fn open(&mut self) {
        info!(doc = %self.name, "opening document");

        if self.hub.store().snapshot_capable() {
            // Filesystem mode: hydrate before serving anyone
            match self.hub.store().load(&self.name).await {
                Ok(record) => self.integrate_initial_load(record),
                Err(e) => {
                    warn!(doc = %self.name, error = %e, "load failed, starting empty");
                    self.hub.metrics().error();
                }
            }
        } else {
            // Table mode: the load resolves later, clients may connect and
            // push updates in the meantime
            let store = self.hub.store().clone();
            let name = self.name.clone();
            let tx = self.self_tx.clone();
            tokio::spawn(async move {
                let record = match store.load(&name).await {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(doc = %name, error = %e, "deferred load failed, starting empty");
                        None
                    }
                };
                let _ = tx.send(DocCommand::HydrationLoaded { record });
            });
        }
    }

    /// Filesystem-mode hydration: snapshot slot first (best effort), then
    /// the stored text replaces the replica content when it differs.
    fn integrate_initial_load(&mut self, record: DocRecord) {
        if let Some(state) = &record.replica_state
            && let Err(e) = self.replica.apply_update(state)
        {
            warn!(doc = %self.name, error = %e, "snapshot hydration failed, continuing without");
        }

        if let Some(text) = &record.text {
            if *text != self.replica.text() {
                self.writing_in = true;
                if let Err(e) = self.replica.replace_text(text) {
                    warn!(doc = %self.name, error = %e, "failed to adopt stored text");
                }
                self.writing_in = false;
            }
            self.last_persisted_hash = Some(content_hash(text));
        }
        self.hub.metrics().load_completed();
    }

    /// Table-mode hydration, arriving after clients may have connected.
    /// The persisted hash comes from a throwaway replica hydrated from the
    /// loaded state, never from the live replica, which may already carry
    /// client updates that would fake an up-to-date hash.
    fn finish_hydration(&mut self, record: Option<DocRecord>) {
        let Some(record) = record else {
            self.hub.metrics().error();
            return;
        };
        self.hub.metrics().load_completed();

        if let Some(state) = &record.replica_state {
            match Replica::from_state(state) {
                Ok(throwaway) => {
                    self.last_persisted_hash = Some(content_hash(&throwaway.text()));
                }
                Err(e) => {
                    warn!(doc = %self.name, error = %e, "stored replica state is unreadable");
                }
            }

            self.writing_in = true;
            match self.replica.apply_update(state) {
                Ok(true) => self.broadcast_update(state, None),
                Ok(false) => {}
                Err(e) => warn!(doc = %self.name, error = %e, "failed to merge stored state"),
            }
            self.writing_in = false;
        } else if let Some(text) = &record.text {
            if self.replica.text_len() == 0 {
                self.writing_in = true;
                match self.replica.replace_text(text) {
                    Ok(Some(update)) => self.broadcast_update(&update, None),
                    Ok(None) => {}
                    Err(e) => warn!(doc = %self.name, error = %e, "failed to adopt stored text"),
                }
                self.writing_in = false;
            }
            self.last_persisted_hash = Some(content_hash(text));
        }
    }

    // ==================== Clients ====================

    fn attach(&mut self, client: ClientHandle) -> AttachOutcome {
        if self.shutting_down {
            return AttachOutcome::ShuttingDown;
        }
        if self.clients.len() >= self.hub.config().max_connections_per_doc {
            return AttachOutcome::AtCapacity;
        }

        self.idle_deadline = None;

        // Handshake: our state vector, then the presence snapshot if any
        let hello = SyncMessage::SyncStep1(self.replica.state_vector()).encode();
        let _ = client.outbound.send(hello);
        if !self.presence.is_empty() {
            let _ = client
                .outbound
                .send(encode_presence_frame(&self.presence.encode_full()));
        }

        debug!(doc = %self.name, client = %client.id, "client attached");
        self.clients.insert(
            client.id,
            ClientState {
                outbound: client.outbound,
                awareness_ids: HashSet::new(),
            },
        );
        self.connections.store(self.clients.len(), Ordering::SeqCst);
        AttachOutcome::Accepted
    }

    fn detach(&mut self, client_id: Uuid) {
        let Some(state) = self.clients.remove(&client_id) else {
            return;
        };
        self.connections.store(self.clients.len(), Ordering::SeqCst);
        debug!(doc = %self.name, client = %client_id, "client detached");

        for awareness_id in state.awareness_ids {
            if self.presence.remove(awareness_id).is_some() {
                let update = self.presence.encode_update(&[awareness_id]);
                self.broadcast_presence(&update);
            }
        }

        if self.clients.is_empty() {
            self.idle_deadline = Some(
                Instant::now() + Duration::from_millis(self.hub.config().doc_cleanup_delay_ms),
            );
        }
    }

    // ==================== Inbound frames ====================

    fn handle_frame(&mut self, client_id: Uuid, data: &[u8]) {
        let messages = match Frame::decode_all(data) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(doc = %self.name, client = %client_id, error = %e, "malformed frame");
                self.hub.metrics().error();
                return;
            }
        };

        let mut reply = Vec::new();
        for message in messages {
            match message {
                Frame::Sync(SyncMessage::SyncStep1(remote_sv)) => {
                    let diff = self.replica.encode_diff(&remote_sv).unwrap_or_else(|e| {
                        warn!(
                            doc = %self.name, error = %e,
                            "bad state vector, answering with full state"
                        );
                        self.replica.encode_state_as_update()
                    });
                    reply.extend(SyncMessage::SyncStep2(diff).encode());
                    reply.extend(SyncMessage::SyncStep1(self.replica.state_vector()).encode());
                }
                Frame::Sync(SyncMessage::SyncStep2(update))
                | Frame::Sync(SyncMessage::Update(update)) => {
                    if update.is_empty() {
                        continue;
                    }
                    match self.replica.apply_update(&update) {
                        Ok(true) => {
                            self.broadcast_update(&update, Some(client_id));
                            self.schedule_write();
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!(doc = %self.name, client = %client_id, error = %e,
                                  "failed to apply update");
                            self.hub.metrics().error();
                        }
                    }
                }
                Frame::Presence(update) => self.handle_presence(client_id, &update),
                Frame::Unknown(code) => {
                    warn!(doc = %self.name, client = %client_id, code,
                          "ignoring message with reserved discriminant");
                    self.hub.metrics().error();
                }
            }
        }

        if !reply.is_empty()
            && let Some(client) = self.clients.get(&client_id)
        {
            let _ = client.outbound.send(reply);
        }
    }

    fn handle_presence(&mut self, client_id: Uuid, update: &[u8]) {
        match self.presence.apply_update(update) {
            Ok(change) => {
                if change.is_empty() {
                    return;
                }
                if let Some(client) = self.clients.get_mut(&client_id) {
                    for id in change.added.iter().chain(change.updated.iter()) {
                        client.awareness_ids.insert(*id);
                    }
                    for id in &change.removed {
                        client.awareness_ids.remove(id);
                    }
                }
                let encoded = self.presence.encode_update(&change.touched());
                self.broadcast_presence(&encoded);
            }
            Err(e) => {
                warn!(doc = %self.name, client = %client_id, error = %e,
                      "malformed presence update");
                self.hub.metrics().error();
            }
        }
    }

    // ==================== External changes ====================

    fn handle_external(&mut self, text: Option<String>) {
        let Some(new_text) = text else {
            warn!(doc = %self.name, "external change could not be read, dropping");
            self.hub.metrics().error();
            return;
        };

        if self.writing_out {
            // Our own rename coming back through the watcher
            return;
        }
        let new_hash = content_hash(&new_text);
        if self.last_persisted_hash.as_deref() == Some(new_hash.as_str()) {
            return; // already integrated
        }

        let old_text = self.replica.text();
        if old_text == new_text {
            self.last_persisted_hash = Some(new_hash);
            return;
        }

        debug!(doc = %self.name, "folding external edit into replica");
        self.writing_in = true;
        let script = diff::diff(&old_text, &new_text);
        match self.replica.apply_edit_script(&script) {
            Ok(update) => {
                self.last_persisted_hash = Some(new_hash);
                if !update.is_empty() {
                    self.broadcast_update(&update, None);
                }
            }
            Err(e) => {
                // Hash untouched, so a later event or debounce reconciles
                error!(doc = %self.name, error = %e, "failed to apply external edit");
                self.hub.metrics().error();
            }
        }
        self.writing_in = false;
    }

    // ==================== Persistence ====================

    /// Arm (or reset) the debounced write. External-edit application must
    /// never land here: those changes are already persistent.
    fn schedule_write(&mut self) {
        if self.writing_in {
            return;
        }
        self.debounce_deadline =
            Some(Instant::now() + Duration::from_millis(self.hub.config().debounce_ms));
    }

    async fn flush(&mut self, final_flush: bool) {
        self.debounce_deadline = None;
        if self.shutting_down && !final_flush {
            return;
        }

        let text = self.replica.text();
        let hash = content_hash(&text);
        if self.last_persisted_hash.as_deref() != Some(hash.as_str()) {
            let state = self
                .hub
                .config()
                .persist_yjs_state
                .then(|| self.replica.encode_state_as_update());

            self.writing_out = true;
            let store = self.hub.store();
            let result = if final_flush {
                store.flush(&self.name, &text, state.as_deref()).await
            } else {
                store.save(&self.name, &text, state.as_deref()).await
            };
            self.writing_out = false;

            match result {
                Ok(()) => {
                    debug!(doc = %self.name, bytes = text.len(), "persisted");
                    self.last_persisted_hash = Some(hash);
                    self.hub.metrics().save_completed();
                }
                Err(e) => {
                    // Hash not advanced: the next debounce retries
                    error!(doc = %self.name, error = %e, "save failed");
                    self.hub.metrics().error();
                }
            }
        }

        if final_flush {
            self.write_snapshot().await;
        }
    }

    async fn write_snapshot(&self) {
        if !self.hub.config().persist_yjs_state || !self.hub.store().snapshot_capable() {
            return;
        }
        let state = self.replica.encode_state_as_update();
        if let Err(e) = self.hub.store().save_snapshot(&self.name, &state).await {
            warn!(doc = %self.name, error = %e, "snapshot write failed");
        }
    }

    fn make_snapshot_timer(&self) -> Option<Interval> {
        if !self.hub.config().persist_yjs_state || !self.hub.store().snapshot_capable() {
            return None;
        }
        let period = Duration::from_millis(self.hub.config().snapshot_interval_ms);
        Some(tokio::time::interval_at(Instant::now() + period, period))
    }

    // ==================== Fan-out ====================

    /// Send an update to every live socket except the one it came from, in
    /// the order the replica integrated it.
    fn broadcast_update(&self, update: &[u8], origin: Option<Uuid>) {
        let frame = SyncMessage::Update(update.to_vec()).encode();
        for (id, client) in &self.clients {
            if Some(*id) == origin {
                continue;
            }
            let _ = client.outbound.send(frame.clone());
        }
    }

    /// Presence changes go to every live socket unconditionally.
    fn broadcast_presence(&self, update: &[u8]) {
        let frame = encode_presence_frame(update);
        for client in self.clients.values() {
            let _ = client.outbound.send(frame.clone());
        }
    }
}

async fn sleep_until_or_never(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hooks::AllowAll;
    use crate::metrics::Metrics;
    use mrmd_core::storage::{DocumentStore, TableStore};

    fn test_hub(debounce_ms: u64) -> (Arc<SyncHub>, Arc<TableStore>) {
        let config = Arc::new(Config {
            debounce_ms,
            doc_cleanup_delay_ms: 60_000,
            ..Default::default()
        });
        let store = Arc::new(TableStore::in_memory("test", "test").unwrap());
        let hub = SyncHub::new(
            config,
            store.clone(),
            Arc::new(AllowAll),
            Arc::new(Metrics::new()),
        );
        (hub, store)
    }

    async fn attach_client(handle: &DocHandle) -> (Uuid, mpsc::UnboundedReceiver<Vec<u8>>) {
        let client_id = Uuid::new_v4();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (reply, ack) = oneshot::channel();
        assert!(handle.send(DocCommand::Attach {
            client: ClientHandle {
                id: client_id,
                outbound: out_tx,
            },
            reply,
        }));
        assert_eq!(ack.await.unwrap(), AttachOutcome::Accepted);
        (client_id, out_rx)
    }

    /// Build an update blob that sets a fresh replica to `text`.
    fn update_setting_text(text: &str) -> Vec<u8> {
        let replica = Replica::new();
        replica.replace_text(text).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_handshake_opens_with_state_vector() {
        let (hub, _store) = test_hub(1000);
        let handle = hub.get_or_create("doc").await;
        let (_id, mut out_rx) = attach_client(&handle).await;

        let hello = out_rx.recv().await.unwrap();
        let frames = Frame::decode_all(&hello).unwrap();
        assert!(matches!(
            frames.as_slice(),
            [Frame::Sync(SyncMessage::SyncStep1(_))]
        ));
    }

    #[tokio::test]
    async fn test_update_is_debounced_and_saved_once() {
        let (hub, store) = test_hub(50);
        let handle = hub.get_or_create("doc").await;
        let (client_id, _out_rx) = attach_client(&handle).await;

        let update = update_setting_text("debounced content");
        handle.send(DocCommand::Inbound {
            client_id,
            data: SyncMessage::Update(update).encode(),
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        let record = store.load("doc").await.unwrap();
        assert_eq!(record.text.as_deref(), Some("debounced content"));
        assert_eq!(hub.metrics().to_json()["files"]["saves"], 1);

        // No further edits: later debounce windows must not write again
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(hub.metrics().to_json()["files"]["saves"], 1);
    }

    #[tokio::test]
    async fn test_update_is_fanned_out_to_other_clients_only() {
        let (hub, _store) = test_hub(1000);
        let handle = hub.get_or_create("doc").await;
        let (sender_id, mut sender_rx) = attach_client(&handle).await;
        let (_peer_id, mut peer_rx) = attach_client(&handle).await;
        sender_rx.recv().await.unwrap(); // drain handshakes
        peer_rx.recv().await.unwrap();

        let update = update_setting_text("fan this out");
        handle.send(DocCommand::Inbound {
            client_id: sender_id,
            data: SyncMessage::Update(update.clone()).encode(),
        });

        let forwarded = tokio::time::timeout(Duration::from_secs(1), peer_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let frames = Frame::decode_all(&forwarded).unwrap();
        assert_eq!(frames, vec![Frame::Sync(SyncMessage::Update(update))]);

        // The origin socket must not receive its own update back
        assert!(
            tokio::time::timeout(Duration::from_millis(200), sender_rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_external_text_matching_replica_is_not_echoed() {
        let (hub, store) = test_hub(50);
        let handle = hub.get_or_create("doc").await;
        let (client_id, mut out_rx) = attach_client(&handle).await;
        out_rx.recv().await.unwrap(); // handshake

        handle.send(DocCommand::Inbound {
            client_id,
            data: SyncMessage::Update(update_setting_text("same text")).encode(),
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            store.load("doc").await.unwrap().text.as_deref(),
            Some("same text")
        );

        // Watcher delivers what we just wrote: no mutation, no broadcast
        handle.send(DocCommand::External {
            text: Some("same text".to_string()),
        });
        assert!(
            tokio::time::timeout(Duration::from_millis(200), out_rx.recv())
                .await
                .is_err(),
            "no-op external change must not reach clients"
        );
    }

    #[tokio::test]
    async fn test_external_edit_is_folded_in_and_broadcast() {
        let (hub, _store) = test_hub(1000);
        let handle = hub.get_or_create("doc").await;
        let (client_id, mut out_rx) = attach_client(&handle).await;
        out_rx.recv().await.unwrap(); // handshake

        handle.send(DocCommand::Inbound {
            client_id,
            data: SyncMessage::Update(update_setting_text("old text")).encode(),
        });

        handle.send(DocCommand::External {
            text: Some("new text".to_string()),
        });

        let forwarded = tokio::time::timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let frames = Frame::decode_all(&forwarded).unwrap();
        let Frame::Sync(SyncMessage::Update(update)) = &frames[0] else {
            panic!("expected an update frame, got {:?}", frames);
        };

        // The folded edit merges cleanly into the client's replica
        let mirror = Replica::new();
        mirror.replace_text("old text").unwrap();
        mirror.apply_update(update).unwrap();
        assert_eq!(mirror.text(), "new text");
    }

    #[tokio::test]
    async fn test_per_doc_capacity_is_enforced_at_attach() {
        let (hub, _store) = test_hub(1000);
        // Rebuild with a tiny per-doc cap
        let config = Arc::new(Config {
            max_connections_per_doc: 1,
            ..Default::default()
        });
        let hub = SyncHub::new(
            config,
            hub.store().clone(),
            Arc::new(AllowAll),
            Arc::new(Metrics::new()),
        );
        let handle = hub.get_or_create("doc").await;
        let (_id, _rx) = attach_client(&handle).await;

        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (reply, ack) = oneshot::channel();
        handle.send(DocCommand::Attach {
            client: ClientHandle {
                id: Uuid::new_v4(),
                outbound: out_tx,
            },
            reply,
        });
        assert_eq!(ack.await.unwrap(), AttachOutcome::AtCapacity);
    }

    #[tokio::test]
    async fn test_presence_update_is_broadcast_to_everyone() {
        let (hub, _store) = test_hub(1000);
        let handle = hub.get_or_create("doc").await;
        let (sender_id, mut sender_rx) = attach_client(&handle).await;
        let (_peer_id, mut peer_rx) = attach_client(&handle).await;
        sender_rx.recv().await.unwrap();
        peer_rx.recv().await.unwrap();

        // One entry: client 9, clock 1, a cursor payload
        use mrmd_core::crdt::protocol::{write_var_string, write_var_uint};
        let mut raw = Vec::new();
        write_var_uint(&mut raw, 1);
        write_var_uint(&mut raw, 9);
        write_var_uint(&mut raw, 1);
        write_var_string(&mut raw, r#"{"cursor":3}"#);

        handle.send(DocCommand::Inbound {
            client_id: sender_id,
            data: mrmd_core::crdt::encode_presence_frame(&raw),
        });

        // Presence goes to every socket, the origin included
        for rx in [&mut sender_rx, &mut peer_rx] {
            let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(
                Frame::decode_all(&frame).unwrap().as_slice(),
                [Frame::Presence(_)]
            ));
        }
    }
}
