//! CRDT support for mrmd-sync.
//!
//! - [`Replica`]: a Y.Doc wrapping the single `content` text register
//! - [`protocol`]: y-protocols compatible wire framing (sync + presence)
//! - [`Presence`]: ephemeral awareness state, broadcast but never persisted

pub mod presence;
pub mod protocol;
pub mod replica;

pub use presence::{Presence, PresenceChange};
pub use protocol::{Frame, SyncMessage, encode_presence_frame};
pub use replica::Replica;
