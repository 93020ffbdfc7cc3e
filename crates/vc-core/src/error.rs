use thiserror::Error;

/// Errors produced by the vibecraft session layer.
#[derive(Debug, Error)]
pub enum VcError {
    #[error("launch failed: {0}")]
    Launch(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("pty error: {0}")]
    Pty(String),

    #[error("host session error: {0}")]
    Host(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<ciborium::de::Error<std::io::Error>> for VcError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        VcError::Codec(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for VcError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        VcError::Codec(e.to_string())
    }
}

pub type VcResult<T> = Result<T, VcError>;
