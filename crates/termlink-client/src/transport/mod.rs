//! Socket plumbing between the driver and the remote host.
//!
//! Each socket the driver opens is tagged with a generation number. Every
//! [`LinkEvent`] carries the generation of the socket that produced it, so
//! the driver can ignore stragglers from a socket it already replaced.

pub mod websocket;

pub(crate) use websocket::{WsSink, WsStream};

/// Notification from a socket task to the driver.
pub(crate) enum LinkEvent {
    /// The WebSocket handshake completed.
    Opened { generation: u64, stream: WsStream },
    /// The handshake failed.
    Failed { generation: u64, error: String },
    /// One text frame arrived.
    Frame { generation: u64, text: String },
    /// The socket closed or errored after opening.
    Closed {
        generation: u64,
        code: u16,
        reason: String,
    },
}

impl LinkEvent {
    pub(crate) fn generation(&self) -> u64 {
        match self {
            Self::Opened { generation, .. }
            | Self::Failed { generation, .. }
            | Self::Frame { generation, .. }
            | Self::Closed { generation, .. } => *generation,
        }
    }
}
