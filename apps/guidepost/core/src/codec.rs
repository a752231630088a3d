//! Framing for [`BridgeMessage`]: JSON text, UTF-8, one message per
//! WebSocket frame.
//!
//! The two ends of this protocol were written independently, so decoding
//! tolerates any casing of field names: object keys are normalized to ASCII
//! lowercase before deserialization. Tag *values* (`"DOM_SUMMARY"` etc.) are
//! matched exactly.

use serde_json::Value;
use thiserror::Error;

use crate::protocol::BridgeMessage;

/// Why a frame could not be decoded. None of these are fatal to the
/// connection; the bridge logs the frame and moves on.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("message has an empty or missing type")]
    MissingType,
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

/// Serializes a message for the wire.
pub fn encode(message: &BridgeMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

/// Parses one frame into a [`BridgeMessage`], case-insensitively on field
/// names.
pub fn decode(raw: &str) -> Result<BridgeMessage, DecodeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::Malformed("empty frame".to_owned()));
    }

    let value: Value =
        serde_json::from_str(trimmed).map_err(|err| DecodeError::Malformed(err.to_string()))?;
    let value = lowercase_keys(value);

    let tag = value
        .as_object()
        .and_then(|object| object.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_owned();
    if tag.is_empty() {
        return Err(DecodeError::MissingType);
    }

    serde_json::from_value(value).map_err(|err| {
        if BridgeMessage::KNOWN_TYPES.contains(&tag.as_str()) {
            DecodeError::Malformed(err.to_string())
        } else {
            DecodeError::UnknownType(tag)
        }
    })
}

fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, inner)| (key.to_ascii_lowercase(), lowercase_keys(inner)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}
