use thiserror::Error;

use termlink_guard::SanitizeError;

use crate::messages::SessionId;

/// Errors produced by the termlink protocol and transport layers.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session closed: {0}")]
    SessionClosed(SessionId),

    #[error("command rejected: {0}")]
    Rejected(#[from] SanitizeError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("timed out waiting for the host")]
    Timeout,

    /// The transport was shut down before the operation completed.
    #[error("transport closed")]
    Closed,
}

impl LinkError {
    /// Whether this error came from the command sanitizer.
    pub fn is_security(&self) -> bool {
        matches!(self, LinkError::Rejected(_))
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(e: serde_json::Error) -> Self {
        LinkError::Codec(e.to_string())
    }
}

pub type LinkResult<T> = Result<T, LinkError>;
