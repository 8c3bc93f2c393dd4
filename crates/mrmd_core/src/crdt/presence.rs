//! Per-document presence (awareness) state.
//!
//! Tracks ephemeral per-client payloads (cursor, selection) keyed by the
//! numeric client identifier each editor picks for itself. Changes are
//! broadcast to every connected socket but never persisted.
//!
//! The wire format is the y-awareness update encoding:
//! `varUint(count)` followed by `varUint(clientId) + varUint(clock) +
//! varString(jsonState)` per entry. A JSON `null` state marks the client as
//! offline and removes it from the map.

use std::collections::HashMap;

use crate::crdt::protocol::{read_var_string, read_var_uint, write_var_string, write_var_uint};
use crate::error::{Result, SyncError};

/// The JSON encoding of an offline client inside an awareness update.
const OFFLINE_STATE: &str = "null";

/// One client's presence entry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PresenceEntry {
    /// Lamport-style clock, bumped by the owning client on every update.
    clock: u64,
    /// Opaque JSON payload as sent by the client.
    state: String,
}

/// The effect of applying one presence update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceChange {
    pub added: Vec<u64>,
    pub updated: Vec<u64>,
    pub removed: Vec<u64>,
}

impl PresenceChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// All client ids the change touches, in added/updated/removed order.
    pub fn touched(&self) -> Vec<u64> {
        let mut ids =
            Vec::with_capacity(self.added.len() + self.updated.len() + self.removed.len());
        ids.extend_from_slice(&self.added);
        ids.extend_from_slice(&self.updated);
        ids.extend_from_slice(&self.removed);
        ids
    }
}

/// Presence map for one document.
#[derive(Debug, Default)]
pub struct Presence {
    states: HashMap<u64, PresenceEntry>,
    /// Clocks linger after removal so a re-encoded removal stays newer than
    /// the client's last live update.
    tombstone_clocks: HashMap<u64, u64>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// All currently-known client ids.
    pub fn client_ids(&self) -> Vec<u64> {
        self.states.keys().copied().collect()
    }

    /// The raw JSON payload for one client, if present.
    pub fn state_of(&self, client_id: u64) -> Option<&str> {
        self.states.get(&client_id).map(|e| e.state.as_str())
    }

    /// Apply an inbound awareness update, returning which clients were
    /// added, updated, or removed. Stale entries (clock not newer than what
    /// we already hold) are skipped.
    pub fn apply_update(&mut self, update: &[u8]) -> Result<PresenceChange> {
        let mut change = PresenceChange::default();
        let mut offset = 0;

        let Some((count, consumed)) = read_var_uint(&update[offset..]) else {
            return Err(SyncError::Protocol("truncated presence update".into()));
        };
        offset += consumed;

        for _ in 0..count {
            let Some((client_id, consumed)) = read_var_uint(&update[offset..]) else {
                return Err(SyncError::Protocol("truncated presence entry".into()));
            };
            offset += consumed;

            let Some((clock, consumed)) = read_var_uint(&update[offset..]) else {
                return Err(SyncError::Protocol("truncated presence clock".into()));
            };
            offset += consumed;

            let Some((state, consumed)) = read_var_string(&update[offset..]) else {
                return Err(SyncError::Protocol("truncated presence state".into()));
            };
            offset += consumed;

            let known_clock = self
                .states
                .get(&client_id)
                .map(|e| e.clock)
                .or_else(|| self.tombstone_clocks.get(&client_id).copied());
            if let Some(known) = known_clock
                && clock <= known
            {
                continue; // stale
            }

            if state == OFFLINE_STATE {
                if self.states.remove(&client_id).is_some() {
                    change.removed.push(client_id);
                }
                self.tombstone_clocks.insert(client_id, clock);
            } else {
                let existed = self
                    .states
                    .insert(client_id, PresenceEntry { clock, state })
                    .is_some();
                self.tombstone_clocks.remove(&client_id);
                if existed {
                    change.updated.push(client_id);
                } else {
                    change.added.push(client_id);
                }
            }
        }

        Ok(change)
    }

    /// Remove a client (used when its socket disconnects). Returns the
    /// change to broadcast, or None if the client was not present.
    pub fn remove(&mut self, client_id: u64) -> Option<PresenceChange> {
        let entry = self.states.remove(&client_id)?;
        self.tombstone_clocks.insert(client_id, entry.clock + 1);
        Some(PresenceChange {
            removed: vec![client_id],
            ..Default::default()
        })
    }

    /// Encode an awareness update covering exactly the given client ids.
    /// Ids no longer present encode as offline with their tombstone clock.
    pub fn encode_update(&self, client_ids: &[u64]) -> Vec<u8> {
        let mut buf = Vec::new();
        write_var_uint(&mut buf, client_ids.len() as u64);
        for &id in client_ids {
            write_var_uint(&mut buf, id);
            match self.states.get(&id) {
                Some(entry) => {
                    write_var_uint(&mut buf, entry.clock);
                    write_var_string(&mut buf, &entry.state);
                }
                None => {
                    let clock = self.tombstone_clocks.get(&id).copied().unwrap_or(1);
                    write_var_uint(&mut buf, clock);
                    write_var_string(&mut buf, OFFLINE_STATE);
                }
            }
        }
        buf
    }

    /// Encode an update covering every known client (the snapshot sent to a
    /// newly-connected socket).
    pub fn encode_full(&self) -> Vec<u8> {
        let ids = self.client_ids();
        self.encode_update(&ids)
    }
}
