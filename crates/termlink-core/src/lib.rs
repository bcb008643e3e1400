//! termlink-core: shared protocol library for the termlink session transport.
//!
//! Provides the JSON wire envelopes exchanged with the remote execution host,
//! the codec that validates them, the opaque session id type, and the error
//! type shared by every termlink crate.

pub mod codec;
pub mod error;
pub mod messages;

// Re-export commonly used items at crate root.
pub use codec::{Decoded, MessageCodec};
pub use error::{LinkError, LinkResult};
pub use messages::{FsOp, FsPayload, Inbound, Outbound, SessionId, INBOUND_TYPES, OUTBOUND_TYPES};
