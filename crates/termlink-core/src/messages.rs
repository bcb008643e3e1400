//! termlink wire envelopes.
//!
//! Every frame is a JSON object with a `type` tag, an optional `sessionId`,
//! and payload fields specific to the type. Field names are camelCase on the
//! wire. The outbound and inbound type sets are closed: adding, removing or
//! renaming a tag is a protocol version change.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LinkError, LinkResult};

/// Every outbound `type` tag, in declaration order.
pub const OUTBOUND_TYPES: [&str; 12] = [
    "ping",
    "session_create",
    "session_resize",
    "session_close",
    "command",
    "pty_input",
    "fs_request_access",
    "fs_read",
    "fs_write",
    "fs_list",
    "fs_watch",
    "fs_unwatch",
];

/// Every inbound `type` tag this client understands.
pub const INBOUND_TYPES: [&str; 7] = [
    "connected",
    "session_created",
    "session_closed",
    "pty_output",
    "command_result",
    "error",
    "pong",
];

/// Opaque, server-assigned session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// File-system operations proxied to the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOp {
    RequestAccess,
    Read,
    Write,
    List,
    Watch,
    Unwatch,
}

/// Opaque payload of a proxied file-system request.
///
/// The transport does not interpret these fields; it only frames them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl FsPayload {
    /// Envelope keys a body may not carry; flattening would duplicate them.
    pub const RESERVED_KEYS: [&'static str; 3] = ["type", "sessionId", "session_id"];

    /// Reject a body that would clash with the envelope.
    pub fn validate(&self) -> LinkResult<()> {
        match Self::RESERVED_KEYS.iter().find(|k| self.body.contains_key(**k)) {
            Some(key) => Err(LinkError::Protocol(format!(
                "file-system payload may not set the envelope key `{key}`"
            ))),
            None => Ok(()),
        }
    }
}

/// Messages sent from this client to the remote host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Outbound {
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
    },
    SessionCreate {
        request_id: String,
        cols: u16,
        rows: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shell: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        env: Option<HashMap<String, String>>,
    },
    SessionResize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    SessionClose {
        session_id: SessionId,
    },
    Command {
        session_id: SessionId,
        command: String,
    },
    PtyInput {
        session_id: SessionId,
        data: String,
    },
    FsRequestAccess(FsPayload),
    FsRead(FsPayload),
    FsWrite(FsPayload),
    FsList(FsPayload),
    FsWatch(FsPayload),
    FsUnwatch(FsPayload),
}

impl Outbound {
    /// Build a proxied file-system request.
    pub fn fs(op: FsOp, payload: FsPayload) -> Self {
        match op {
            FsOp::RequestAccess => Self::FsRequestAccess(payload),
            FsOp::Read => Self::FsRead(payload),
            FsOp::Write => Self::FsWrite(payload),
            FsOp::List => Self::FsList(payload),
            FsOp::Watch => Self::FsWatch(payload),
            FsOp::Unwatch => Self::FsUnwatch(payload),
        }
    }

    /// The wire `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Ping { .. } => "ping",
            Self::SessionCreate { .. } => "session_create",
            Self::SessionResize { .. } => "session_resize",
            Self::SessionClose { .. } => "session_close",
            Self::Command { .. } => "command",
            Self::PtyInput { .. } => "pty_input",
            Self::FsRequestAccess(_) => "fs_request_access",
            Self::FsRead(_) => "fs_read",
            Self::FsWrite(_) => "fs_write",
            Self::FsList(_) => "fs_list",
            Self::FsWatch(_) => "fs_watch",
            Self::FsUnwatch(_) => "fs_unwatch",
        }
    }

    /// The payload of a file-system request.
    pub fn fs_payload(&self) -> Option<&FsPayload> {
        match self {
            Self::FsRequestAccess(p)
            | Self::FsRead(p)
            | Self::FsWrite(p)
            | Self::FsList(p)
            | Self::FsWatch(p)
            | Self::FsUnwatch(p) => Some(p),
            _ => None,
        }
    }

    /// The session this message targets, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::Ping { .. } | Self::SessionCreate { .. } => None,
            Self::SessionResize { session_id, .. }
            | Self::SessionClose { session_id }
            | Self::Command { session_id, .. }
            | Self::PtyInput { session_id, .. } => Some(session_id),
            Self::FsRequestAccess(p)
            | Self::FsRead(p)
            | Self::FsWrite(p)
            | Self::FsList(p)
            | Self::FsWatch(p)
            | Self::FsUnwatch(p) => p.session_id.as_ref(),
        }
    }
}

/// Messages received from the remote host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Inbound {
    /// Connection-level acknowledgment sent once the host is ready.
    Connected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_version: Option<String>,
    },
    SessionCreated {
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    SessionClosed {
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal: Option<String>,
    },
    PtyOutput {
        session_id: SessionId,
        data: String,
    },
    CommandResult {
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<Value>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
    },
}

impl Inbound {
    /// The wire `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::SessionCreated { .. } => "session_created",
            Self::SessionClosed { .. } => "session_closed",
            Self::PtyOutput { .. } => "pty_output",
            Self::CommandResult { .. } => "command_result",
            Self::Error { .. } => "error",
            Self::Pong { .. } => "pong",
        }
    }

    /// The session this message refers to, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::Connected { .. } => None,
            Self::SessionCreated { session_id, .. }
            | Self::SessionClosed { session_id, .. }
            | Self::PtyOutput { session_id, .. }
            | Self::CommandResult { session_id, .. } => Some(session_id),
            Self::Error { session_id, .. } | Self::Pong { session_id, .. } => session_id.as_ref(),
        }
    }
}
