//! Encoder and decoder for gateway frames.
//!
//! Decoding happens in two stages. The outer envelope must always be valid
//! JSON and any failure there is fatal. The payload is parsed separately by
//! [`Payload::parse`], which never fails: text that is not JSON is kept as-is.

use crate::error::ProtocolError;
use crate::frame::{Frame, MessageType};
use crate::MAX_FRAME_SIZE;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Encodes frames into WebSocket text messages.
pub struct Encoder;

impl Encoder {
    /// Encodes a frame.
    pub fn encode(frame: &Frame) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(frame)?)
    }

    /// Builds and encodes a frame from its parts.
    pub fn encode_parts(
        msg_type: MessageType,
        sequence: u64,
        name: &str,
        body: &Value,
    ) -> Result<String, ProtocolError> {
        let frame = Frame::new(msg_type, sequence, name, serde_json::to_string(body)?);
        Self::encode(&frame)
    }
}

/// Decodes WebSocket messages into frames.
pub struct Decoder;

impl Decoder {
    /// Decodes a text message.
    pub fn decode(text: &str) -> Result<Frame, ProtocolError> {
        if text.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: text.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| ProtocolError::MalformedFrame("frame is not an object".to_string()))?;

        for field in ["m", "i", "n"] {
            if !object.contains_key(field) {
                return Err(ProtocolError::MissingField(field));
            }
        }

        if let Some(code) = object.get("m").and_then(Value::as_u64) {
            let known = u8::try_from(code)
                .ok()
                .and_then(|code| MessageType::try_from(code).ok());
            if known.is_none() {
                return Err(ProtocolError::InvalidMessageType(code));
            }
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }

    /// Decodes a binary message holding UTF-8 text.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Frame, ProtocolError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
        Self::decode(text)
    }
}

/// A frame payload after the second parsing stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The payload parsed as JSON.
    Json(Value),
    /// The payload did not parse and is passed through verbatim.
    Raw(String),
}

impl Payload {
    /// Parses payload text, falling back to [`Payload::Raw`].
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Raw(text.to_string()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Payload::Raw(_))
    }

    /// Looks up a top-level field of an object payload.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_json().and_then(|value| value.get(field))
    }

    /// Converts into a JSON value; raw text becomes a JSON string.
    pub fn into_value(self) -> Value {
        match self {
            Payload::Json(value) => value,
            Payload::Raw(text) => Value::String(text),
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Payload::Json(value) => value.serialize(serializer),
            Payload::Raw(text) => serializer.serialize_str(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_encoder_decoder_roundtrip() {
        let encoded =
            Encoder::encode_parts(MessageType::Request, 42, "GetProducts", &json!({"OMSId": 1}))
                .unwrap();
        let decoded = Decoder::decode(&encoded).unwrap();

        assert_eq!(decoded.msg_type, MessageType::Request);
        assert_eq!(decoded.sequence, 42);
        assert_eq!(decoded.name, "GetProducts");
        assert_eq!(Payload::parse(&decoded.payload), Payload::Json(json!({"OMSId": 1})));
    }

    #[test]
    fn test_decode_malformed_envelope() {
        let result = Decoder::decode("not json at all");
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));

        let result = Decoder::decode("[1, 2, 3]");
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_missing_field() {
        let result = Decoder::decode(r#"{"m":1,"i":2,"o":"{}"}"#);
        assert!(matches!(result, Err(ProtocolError::MissingField("n"))));
    }

    #[test]
    fn test_decode_unknown_type_code() {
        let result = Decoder::decode(r#"{"m":9,"i":2,"n":"Ping","o":"{}"}"#);
        assert!(matches!(result, Err(ProtocolError::InvalidMessageType(9))));

        let result = Decoder::decode(r#"{"m":300,"i":2,"n":"Ping","o":"{}"}"#);
        assert!(matches!(result, Err(ProtocolError::InvalidMessageType(300))));
    }

    #[test]
    fn test_decode_bytes_invalid_utf8() {
        let result = Decoder::decode_bytes(&[0xff, 0xfe, 0x00]);
        assert!(matches!(result, Err(ProtocolError::InvalidUtf8)));
    }

    #[test]
    fn test_decode_bytes() {
        let frame = Decoder::decode_bytes(br#"{"m":3,"i":10,"n":"Level1UpdateEvent","o":"{}"}"#)
            .unwrap();
        assert_eq!(frame.msg_type, MessageType::Event);
    }

    #[test]
    fn test_payload_falls_back_to_raw() {
        let payload = Payload::parse("Endpoint Not Found");
        assert_eq!(payload, Payload::Raw("Endpoint Not Found".to_string()));
        assert!(payload.is_raw());
        assert!(payload.get("anything").is_none());
        assert_eq!(payload.into_value(), json!("Endpoint Not Found"));
    }

    #[test]
    fn test_payload_array_of_arrays() {
        let payload = Payload::parse("[[1,6,0.5],[2,6,0.6]]");
        let rows = payload.as_json().unwrap().as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], json!(6));
    }

    #[test]
    fn test_payload_serializes_transparently() {
        let json = serde_json::to_string(&Payload::Json(json!({"a": 1}))).unwrap();
        assert_eq!(json, r#"{"a":1}"#);
        let raw = serde_json::to_string(&Payload::Raw("oops".to_string())).unwrap();
        assert_eq!(raw, r#""oops""#);
    }

    fn message_type() -> impl Strategy<Value = MessageType> {
        (0u8..=5).prop_map(|code| MessageType::try_from(code).unwrap())
    }

    proptest! {
        #[test]
        fn prop_frame_roundtrip(
            msg_type in message_type(),
            sequence in (0u64..u32::MAX as u64).prop_map(|n| n * 2),
            name in "[A-Za-z0-9]{1,32}",
            body in ".{0,64}",
        ) {
            let frame = Frame::new(msg_type, sequence, name.clone(), body.clone());
            let decoded = Decoder::decode(&Encoder::encode(&frame).unwrap()).unwrap();
            prop_assert_eq!(decoded.msg_type, msg_type);
            prop_assert_eq!(decoded.sequence, sequence);
            prop_assert_eq!(decoded.name, name);
            prop_assert_eq!(decoded.payload, body);
        }
    }
}
