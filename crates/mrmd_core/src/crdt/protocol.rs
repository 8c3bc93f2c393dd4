//! Y-sync wire protocol framing.
//!
//! Duplex framed binary, y-protocols compatible. Every message begins with
//! a variable-length unsigned integer discriminant:
//!
//! - `varUint(0)`: sync message
//!   - `varUint(0)`: SyncStep1 - contains a state vector
//!   - `varUint(1)`: SyncStep2 - contains missing updates
//!   - `varUint(2)`: Update - contains an incremental update
//! - `varUint(1)`: presence message - a length-prefixed awareness update
//!
//! Byte arrays are encoded as: `varUint(length) + raw bytes`. One socket
//! frame may carry several complete messages back to back (e.g. SyncStep2 +
//! SyncStep1 during the handshake). Reserved discriminants are ignored by
//! receivers.

use crate::error::{Result, SyncError};

// ===========================================================================
// VarUint encoding/decoding (y-protocols compatible)
// ===========================================================================

/// Write a variable-length unsigned integer to a buffer.
/// Uses 7 bits per byte, with MSB indicating continuation.
pub fn write_var_uint(buf: &mut Vec<u8>, mut num: u64) {
    loop {
        let mut byte = (num & 0x7F) as u8;
        num >>= 7;
        if num > 0 {
            byte |= 0x80; // Set continuation bit
        }
        buf.push(byte);
        if num == 0 {
            break;
        }
    }
}

/// Read a variable-length unsigned integer from a buffer.
/// Returns (value, bytes_consumed) or None if buffer is too short.
pub fn read_var_uint(data: &[u8]) -> Option<(u64, usize)> {
    let mut num: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        num |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some((num, i + 1));
        }
        shift += 7;
        if shift > 63 {
            return None; // Overflow
        }
    }
    None // Incomplete
}

/// Write a byte array with length prefix (varUint encoding).
pub fn write_var_byte_array(buf: &mut Vec<u8>, data: &[u8]) {
    write_var_uint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Read a byte array with length prefix.
/// Returns (data, bytes_consumed) or None if buffer is too short.
pub fn read_var_byte_array(data: &[u8]) -> Option<(Vec<u8>, usize)> {
    let (len, len_bytes) = read_var_uint(data)?;
    let len = len as usize;
    let total = len_bytes.checked_add(len)?;
    if data.len() < total {
        return None;
    }
    Some((data[len_bytes..total].to_vec(), total))
}

/// Write a UTF-8 string with length prefix.
pub fn write_var_string(buf: &mut Vec<u8>, s: &str) {
    write_var_byte_array(buf, s.as_bytes());
}

/// Read a UTF-8 string with length prefix.
pub fn read_var_string(data: &[u8]) -> Option<(String, usize)> {
    let (bytes, consumed) = read_var_byte_array(data)?;
    let s = String::from_utf8(bytes).ok()?;
    Some((s, consumed))
}

/// Message discriminants.
pub mod frame_type {
    /// Sync message (SyncStep1, SyncStep2, Update)
    pub const SYNC: u8 = 0;
    /// Presence (awareness) message
    pub const PRESENCE: u8 = 1;
}

/// Sync sub-message types.
mod sync_type {
    /// SyncStep1: Initial state vector exchange
    pub const STEP1: u8 = 0;
    /// SyncStep2: Missing updates response
    pub const STEP2: u8 = 1;
    /// Update: Incremental update
    pub const UPDATE: u8 = 2;
}

/// Y-sync message types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// SyncStep1 contains a state vector
    SyncStep1(Vec<u8>),
    /// SyncStep2 contains missing updates
    SyncStep2(Vec<u8>),
    /// Update contains an incremental update
    Update(Vec<u8>),
}

impl SyncMessage {
    /// Encode the message as one complete wire message.
    /// Format: varUint(0) + varUint(syncType) + varByteArray(payload)
    pub fn encode(&self) -> Vec<u8> {
        let (sync_type, payload) = match self {
            SyncMessage::SyncStep1(sv) => (sync_type::STEP1, sv),
            SyncMessage::SyncStep2(update) => (sync_type::STEP2, update),
            SyncMessage::Update(update) => (sync_type::UPDATE, update),
        };
        let mut buf = Vec::with_capacity(2 + payload.len() + 5);
        write_var_uint(&mut buf, frame_type::SYNC as u64);
        write_var_uint(&mut buf, sync_type as u64);
        write_var_byte_array(&mut buf, payload);
        buf
    }

    /// Decode a sync sub-message (sync_type + payload) without the message
    /// discriminant. Returns (message, bytes_consumed).
    fn decode_body(data: &[u8]) -> Result<(Self, usize)> {
        let Some((sync_type_val, sync_type_bytes)) = read_var_uint(data) else {
            return Err(SyncError::Protocol("truncated sync type".into()));
        };

        let remaining = &data[sync_type_bytes..];
        let Some((payload, payload_bytes)) = read_var_byte_array(remaining) else {
            return Err(SyncError::Protocol("truncated sync payload".into()));
        };

        let total_consumed = sync_type_bytes + payload_bytes;

        let msg = match sync_type_val {
            v if v == sync_type::STEP1 as u64 => SyncMessage::SyncStep1(payload),
            v if v == sync_type::STEP2 as u64 => SyncMessage::SyncStep2(payload),
            v if v == sync_type::UPDATE as u64 => SyncMessage::Update(payload),
            _ => {
                return Err(SyncError::Protocol(format!(
                    "unknown sync type: {}",
                    sync_type_val
                )));
            }
        };

        Ok((msg, total_consumed))
    }
}

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A sync message.
    Sync(SyncMessage),
    /// An opaque awareness update.
    Presence(Vec<u8>),
    /// A message with a reserved discriminant. Its length is unknowable, so
    /// it also swallows the remainder of the socket frame.
    Unknown(u64),
}

impl Frame {
    /// Decode every complete message in one socket frame.
    pub fn decode_all(data: &[u8]) -> Result<Vec<Frame>> {
        if data.is_empty() {
            return Err(SyncError::Protocol("empty frame".into()));
        }

        let mut frames = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            let Some((discriminant, consumed)) = read_var_uint(&data[offset..]) else {
                return Err(SyncError::Protocol("truncated message discriminant".into()));
            };
            offset += consumed;

            match discriminant {
                d if d == frame_type::SYNC as u64 => {
                    let (msg, used) = SyncMessage::decode_body(&data[offset..])?;
                    frames.push(Frame::Sync(msg));
                    offset += used;
                }
                d if d == frame_type::PRESENCE as u64 => {
                    let Some((payload, used)) = read_var_byte_array(&data[offset..]) else {
                        return Err(SyncError::Protocol("truncated presence message".into()));
                    };
                    frames.push(Frame::Presence(payload));
                    offset += used;
                }
                _ => {
                    // Reserved discriminant: no length to skip by, so the
                    // rest of the socket frame goes with it.
                    frames.push(Frame::Unknown(discriminant));
                    break;
                }
            }
        }

        log::debug!("decoded {} messages from socket frame", frames.len());
        Ok(frames)
    }
}

/// Encode an opaque awareness update as one complete presence message.
pub fn encode_presence_frame(update: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + update.len() + 5);
    write_var_uint(&mut buf, frame_type::PRESENCE as u64);
    write_var_byte_array(&mut buf, update);
    buf
}
