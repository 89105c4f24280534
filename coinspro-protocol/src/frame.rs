//! Frame envelope for the gateway protocol.
//!
//! Every WebSocket text message carries exactly one frame:
//!
//! ```text
//! {"m": <type code>, "i": <sequence>, "n": "<function name>", "o": "<JSON-encoded payload>"}
//! ```
//!
//! The payload travels as a string; it is parsed in a second step by
//! [`Payload::parse`](crate::codec::Payload::parse).

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message type codes carried in the `m` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    Request,
    Reply,
    SubscribeToEvent,
    Event,
    UnsubscribeFromEvent,
    Error,
}

impl MessageType {
    pub fn code(self) -> u8 {
        match self {
            MessageType::Request => 0,
            MessageType::Reply => 1,
            MessageType::SubscribeToEvent => 2,
            MessageType::Event => 3,
            MessageType::UnsubscribeFromEvent => 4,
            MessageType::Error => 5,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, ProtocolError> {
        match code {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::Reply),
            2 => Ok(MessageType::SubscribeToEvent),
            3 => Ok(MessageType::Event),
            4 => Ok(MessageType::UnsubscribeFromEvent),
            5 => Ok(MessageType::Error),
            other => Err(ProtocolError::InvalidMessageType(other.into())),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value.code()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Request => write!(f, "REQUEST"),
            MessageType::Reply => write!(f, "REPLY"),
            MessageType::SubscribeToEvent => write!(f, "SUBSCRIBE"),
            MessageType::Event => write!(f, "EVENT"),
            MessageType::UnsubscribeFromEvent => write!(f, "UNSUBSCRIBE"),
            MessageType::Error => write!(f, "ERROR"),
        }
    }
}

/// A frame with its payload still in encoded form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Message type.
    #[serde(rename = "m")]
    pub msg_type: MessageType,

    /// Sequence number correlating requests with replies.
    #[serde(rename = "i")]
    pub sequence: u64,

    /// Remote function or event name.
    #[serde(rename = "n")]
    pub name: String,

    /// JSON-encoded payload, left uninterpreted at this layer.
    #[serde(rename = "o", default, deserialize_with = "payload_text")]
    pub payload: String,
}

impl Frame {
    pub fn new(
        msg_type: MessageType,
        sequence: u64,
        name: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            msg_type,
            sequence,
            name: name.into(),
            payload: payload.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.msg_type == MessageType::Error
    }
}

/// Accepts the payload either as a string or as inline JSON.
///
/// The gateway always sends a string, but inline JSON is kept verbatim so a
/// peer that embeds the object directly still decodes.
fn payload_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}
