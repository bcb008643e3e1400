//! JSON envelope codec for the termlink control channel.
//!
//! Wire format: one JSON object per WebSocket text frame. Inbound frames are
//! validated before anything else sees them: the frame must be an object with
//! a string `type`; unknown types are reported as [`Decoded::Unknown`] so the
//! caller can drop them without treating them as fatal.

use serde_json::Value;

use crate::error::{LinkError, LinkResult};
use crate::messages::{Inbound, Outbound, INBOUND_TYPES};

/// Result of decoding a single inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A well-formed message of a known type.
    Message(Inbound),
    /// A well-formed envelope whose type this client does not know.
    Unknown(String),
}

/// Stateless encoder/decoder for wire envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec;

impl MessageCodec {
    /// Encode an outbound message as a JSON text frame.
    pub fn encode(msg: &Outbound) -> LinkResult<String> {
        if let Some(payload) = msg.fs_payload() {
            payload.validate()?;
        }
        Ok(serde_json::to_string(msg)?)
    }

    /// Decode and validate an inbound JSON text frame.
    pub fn decode(text: &str) -> LinkResult<Decoded> {
        let value: Value = serde_json::from_str(text)?;

        let msg_type = match &value {
            Value::Object(obj) => match obj.get("type") {
                Some(Value::String(t)) => t.clone(),
                Some(_) => return Err(LinkError::Protocol("envelope `type` is not a string".into())),
                None => return Err(LinkError::Protocol("envelope has no `type`".into())),
            },
            _ => return Err(LinkError::Protocol("envelope is not a JSON object".into())),
        };

        if !INBOUND_TYPES.contains(&msg_type.as_str()) {
            return Ok(Decoded::Unknown(msg_type));
        }

        let msg: Inbound = serde_json::from_value(value)
            .map_err(|e| LinkError::Protocol(format!("invalid `{msg_type}` envelope: {e}")))?;

        if msg.session_id().is_some_and(|id| id.is_empty()) {
            return Err(LinkError::Protocol(format!(
                "`{msg_type}` envelope has an empty sessionId"
            )));
        }

        Ok(Decoded::Message(msg))
    }
}
