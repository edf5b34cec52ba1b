//! JSON frame codec for the socket channel.
//!
//! Frames are JSON text of the form `{"event": <name>, "data": <payload>}`.
//! Both directions are provided: the client encodes [`ClientEvent`]s and
//! decodes [`ServerEvent`]s; the reverse pair backs in-process test servers.

use crate::event::{ClientEvent, ServerEvent};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("encode error: {0}")]
    Encode(String),
    /// The frame is not valid JSON or does not match any known event.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Encode a [`ClientEvent`] into a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if the event cannot be serialized.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a JSON text frame into a [`ServerEvent`].
///
/// # Errors
///
/// Returns [`CodecError::InvalidFrame`] if the text is not valid JSON or
/// does not match a known server event.
pub fn decode_server(frame: &str) -> Result<ServerEvent, CodecError> {
    serde_json::from_str(frame).map_err(|e| CodecError::InvalidFrame(e.to_string()))
}

/// Encode a [`ServerEvent`] into a JSON text frame (server side).
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if the event cannot be serialized.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a JSON text frame into a [`ClientEvent`] (server side).
///
/// # Errors
///
/// Returns [`CodecError::InvalidFrame`] if the text is not valid JSON or
/// does not match a known client event.
pub fn decode_client(frame: &str) -> Result<ClientEvent, CodecError> {
    serde_json::from_str(frame).map_err(|e| CodecError::InvalidFrame(e.to_string()))
}
