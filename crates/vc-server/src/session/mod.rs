//! Session management: host sessions, PTY attachments, replay buffer, fan-out.

pub mod env;
pub mod host;
pub mod manager;
pub mod pty;
pub mod ring_buffer;
pub mod sink;

pub use host::TmuxHost;
pub use manager::{IdlePolicy, SessionConfig, SessionManager};
pub use pty::NativePtySpawner;
pub use sink::{ChannelSink, SinkRef};
