//! The CRDT replica owned by a document coordinator.
//!
//! A replica is a Y.Doc containing exactly one text register named
//! `content`. Update blobs are idempotent and commutative under apply, so
//! peers converge regardless of delivery order. Local mutations capture
//! their incremental update by recording the state vector before the change
//! and encoding the difference afterwards.

use yrs::{
    Doc, GetString, ReadTxn, StateVector, Text, Transact, Update, updates::decoder::Decode,
    updates::encoder::Encode,
};

use crate::diff::{self, EditOp};
use crate::error::{Result, SyncError};

/// Name of the Y.Text holding the document content.
const CONTENT_TEXT_NAME: &str = "content";

/// A CRDT document for one synchronized text.
pub struct Replica {
    doc: Doc,
    content: yrs::TextRef,
}

impl Replica {
    /// Create a new empty replica.
    pub fn new() -> Self {
        let doc = Doc::new();
        let content = doc.get_or_insert_text(CONTENT_TEXT_NAME);
        Self { doc, content }
    }

    /// Hydrate a replica from a previously encoded full state.
    pub fn from_state(state: &[u8]) -> Result<Self> {
        let replica = Self::new();
        replica.apply_update(state)?;
        Ok(replica)
    }

    // ==================== Content ====================

    /// Current value of the `content` register.
    pub fn text(&self) -> String {
        let txn = self.doc.transact();
        self.content.get_string(&txn)
    }

    /// Length of the content register in Y.js units.
    pub fn text_len(&self) -> u32 {
        let txn = self.doc.transact();
        self.content.len(&txn)
    }

    // ==================== Sync ====================

    /// Encode the current state vector.
    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encode the full state as an update blob.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Encode the difference between this replica and a remote state vector.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_state_vector)
            .map_err(|e| SyncError::Crdt(format!("failed to decode state vector: {}", e)))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Integrate an update blob from a peer.
    ///
    /// Returns true when the update actually changed the replica;
    /// re-delivery of an already-integrated update returns false. Deletions
    /// travel in the delete set and leave the state vector untouched, so
    /// the content register is compared as well.
    pub fn apply_update(&self, update: &[u8]) -> Result<bool> {
        let decoded = Update::decode_v1(update)
            .map_err(|e| SyncError::Crdt(format!("failed to decode update: {}", e)))?;

        let (sv_before, text_before) = {
            let txn = self.doc.transact();
            (txn.state_vector(), self.content.get_string(&txn))
        };

        {
            let mut txn = self.doc.transact_mut();
            txn.apply_update(decoded)
                .map_err(|e| SyncError::Crdt(format!("failed to apply update: {}", e)))?;
        }

        let (sv_after, text_after) = {
            let txn = self.doc.transact();
            (txn.state_vector(), self.content.get_string(&txn))
        };
        Ok(sv_after != sv_before || text_after != text_before)
    }

    // ==================== Local mutation ====================

    /// Apply a character-level edit script inside a single transaction.
    ///
    /// Walks the script maintaining a cursor: retains advance it, deletes
    /// remove at it, inserts add at it and advance past the inserted text.
    /// Returns the update blob representing the change (empty when the
    /// script was empty).
    pub fn apply_edit_script(&self, script: &[EditOp]) -> Result<Vec<u8>> {
        if script.is_empty() {
            return Ok(Vec::new());
        }

        let old_text = self.text();
        let sv_before = {
            let txn = self.doc.transact();
            txn.state_vector()
        };

        {
            let mut txn = self.doc.transact_mut();
            let mut chars = old_text.chars();
            // Y.js positions count UTF-8 bytes, scripts count code points
            let mut position: u32 = 0;

            let mut take_bytes = |n: usize| -> Result<u32> {
                let mut bytes = 0u32;
                for _ in 0..n {
                    let c = chars.next().ok_or_else(|| {
                        SyncError::Crdt("edit script extends past end of text".into())
                    })?;
                    bytes += c.len_utf8() as u32;
                }
                Ok(bytes)
            };

            for op in script {
                match op {
                    EditOp::Retain(n) => {
                        position += take_bytes(*n)?;
                    }
                    EditOp::Delete(n) => {
                        let len = take_bytes(*n)?;
                        self.content.remove_range(&mut txn, position, len);
                    }
                    EditOp::Insert(s) => {
                        self.content.insert(&mut txn, position, s);
                        position += s.len() as u32;
                    }
                }
            }
        }

        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv_before))
    }

    /// Replace the content with `new_text` using a minimal diff, so that
    /// operation IDs for unchanged content survive and concurrent client
    /// edits still merge. Returns the update blob, or None when the content
    /// already matches.
    pub fn replace_text(&self, new_text: &str) -> Result<Option<Vec<u8>>> {
        let current = self.text();
        if current == new_text {
            return Ok(None);
        }
        let script = diff::diff(&current, new_text);
        let update = self.apply_edit_script(&script)?;
        Ok(Some(update))
    }
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("text_len", &self.text_len())
            .finish_non_exhaustive()
    }
}
