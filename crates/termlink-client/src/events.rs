//! Events published by the transport.
//!
//! Consumers usually match on [`TransportEvent`] directly. [`TransportEvent::name`]
//! gives each variant a stable string name for logging and for bridging to
//! string-keyed listeners; that set is [`EVENT_NAMES`] and does not change
//! without a version bump.

use std::time::Duration;

use termlink_core::{Inbound, SessionId};

/// Every event name, in the order the variants are declared.
pub const EVENT_NAMES: [&str; 14] = [
    "connecting",
    "connected",
    "reconnected",
    "disconnected",
    "reconnecting",
    "error",
    "pty:output",
    "session_created",
    "session_closed",
    "session:session_created",
    "session:command_result",
    "session:error",
    "session:pong",
    "message",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A socket open is starting. `attempt` is 0 for the first try.
    Connecting { attempt: u32 },
    /// The host acknowledged a fresh connection.
    Connected,
    /// The host acknowledged a connection that replaced a lost one.
    Reconnected { attempts: u32 },
    Disconnected { code: u16, reason: String },
    /// A reconnect attempt is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Transport-level failure. `fatal` means the connection was abandoned.
    Error { message: String, fatal: bool },
    /// Output for the attached session, including attach replays.
    PtyOutput { session_id: SessionId, data: String },
    SessionCreated { session_id: SessionId },
    SessionClosed {
        session_id: SessionId,
        exit_code: Option<i32>,
        signal: Option<String>,
    },
    /// Per-session message from the host.
    Session(SessionEvent),
    /// Any valid inbound envelope other than `pty_output`, after the
    /// specific event for it has been emitted.
    Message(Inbound),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Created {
        session_id: SessionId,
    },
    CommandResult {
        session_id: SessionId,
        output: Option<String>,
        exit_code: Option<i32>,
    },
    Error {
        session_id: Option<SessionId>,
        message: String,
    },
    Pong {
        session_id: Option<SessionId>,
        id: Option<u64>,
    },
}

impl TransportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting { .. } => "connecting",
            Self::Connected => "connected",
            Self::Reconnected { .. } => "reconnected",
            Self::Disconnected { .. } => "disconnected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Error { .. } => "error",
            Self::PtyOutput { .. } => "pty:output",
            Self::SessionCreated { .. } => "session_created",
            Self::SessionClosed { .. } => "session_closed",
            Self::Session(SessionEvent::Created { .. }) => "session:session_created",
            Self::Session(SessionEvent::CommandResult { .. }) => "session:command_result",
            Self::Session(SessionEvent::Error { .. }) => "session:error",
            Self::Session(SessionEvent::Pong { .. }) => "session:pong",
            Self::Message(_) => "message",
        }
    }

    /// The session this event concerns, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::PtyOutput { session_id, .. }
            | Self::SessionCreated { session_id }
            | Self::SessionClosed { session_id, .. }
            | Self::Session(SessionEvent::Created { session_id })
            | Self::Session(SessionEvent::CommandResult { session_id, .. }) => Some(session_id),
            Self::Session(SessionEvent::Error { session_id, .. })
            | Self::Session(SessionEvent::Pong { session_id, .. }) => session_id.as_ref(),
            Self::Message(msg) => msg.session_id(),
            _ => None,
        }
    }
}
