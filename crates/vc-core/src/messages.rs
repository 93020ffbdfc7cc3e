//! Client requests and server notifications exchanged over a connection.
//!
//! The four notification shapes a session produces (`output`,
//! `buffer_replay`, `detached`, `exit`) are transport-agnostic; the server
//! frames them with [`crate::codec::frame_encode`].

use serde::{Deserialize, Serialize};

/// Whether a session is backed by a detachable host or is a bare shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Hosted,
    Standalone,
}

/// Lifecycle state of a registered session.
///
/// There is no `Killed` state: a killed session is removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Host exists, nothing has attached yet.
    Created,
    /// A PTY attachment is live and streaming.
    Attached,
    /// The attachment went away but the host is still running.
    Detached,
}

/// Snapshot of a session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub kind: SessionKind,
    /// Host session name; `None` for standalone shells.
    pub host_name: Option<String>,
    pub state: SessionState,
    /// Process-unique id of the live attachment, if any.
    pub attachment_id: Option<u64>,
    pub pid: Option<u32>,
    pub subscribers: usize,
    pub buffered_chunks: usize,
    pub cols: u16,
    pub rows: u16,
    pub cwd: Option<String>,
}

/// Requests sent by a viewer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Create {
        session_id: String,
        cwd: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        host_name: Option<String>,
    },
    Register {
        session_id: String,
        host_name: String,
    },
    Attach {
        session_id: String,
    },
    Detach {
        session_id: String,
    },
    Subscribe {
        session_id: String,
    },
    Unsubscribe {
        session_id: String,
    },
    Input {
        session_id: String,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    Resize {
        session_id: String,
        cols: u16,
        rows: u16,
    },
    Kill {
        session_id: String,
    },
    IsAlive {
        session_id: String,
    },
    CreateShell {
        session_id: String,
        #[serde(default)]
        cwd: Option<String>,
    },
    CloseShell {
        session_id: String,
    },
    ListShells,
    List,
    Info {
        session_id: String,
    },
}

/// Messages pushed to a viewer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Live PTY output.
    Output {
        session_id: String,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    /// Concatenated backlog, sent once on subscribe before any live output.
    BufferReplay {
        session_id: String,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    /// The attachment exited but the host session may still be running.
    Detached { session_id: String, exit_code: i32 },
    /// The session is gone for good.
    Exit { session_id: String, exit_code: i32 },
    /// Outcome of a request that has no richer response.
    Ack {
        request: String,
        session_id: Option<String>,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Alive { session_id: String, alive: bool },
    Sessions { sessions: Vec<SessionInfo> },
}

impl ServerMessage {
    /// Session this message belongs to, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Output { session_id, .. }
            | ServerMessage::BufferReplay { session_id, .. }
            | ServerMessage::Detached { session_id, .. }
            | ServerMessage::Exit { session_id, .. }
            | ServerMessage::Alive { session_id, .. } => Some(session_id),
            ServerMessage::Ack { session_id, .. } => session_id.as_deref(),
            ServerMessage::Sessions { .. } => None,
        }
    }
}
