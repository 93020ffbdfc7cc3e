//! vc-core: Shared protocol library for the vibecraft session server.
//!
//! Provides the error type, client/server message types and the
//! length-prefixed CBOR codec used on the wire.

pub mod codec;
pub mod error;
pub mod messages;

// Re-export commonly used items at crate root.
pub use codec::{cbor_decode, frame_encode, FrameDecoder};
pub use error::{VcError, VcResult};
pub use messages::{ClientMessage, ServerMessage, SessionInfo, SessionKind, SessionState};
