//! Client/server event unions for the room-scoped socket channel.
//!
//! Every frame on the channel is one of these variants, tagged by event
//! name. Using closed enums (rather than stringly-typed event dispatch)
//! means a session handles every inbound event or fails to compile.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{CardId, Conversation, DmRoomId, RoomId};
use crate::message::Message;

/// Events the client emits to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Join a shared city room after connecting.
    JoinRoom {
        /// The room to join.
        room_id: RoomId,
    },
    /// Send a text message to the joined room.
    SendMessage {
        /// Message text.
        content: String,
    },
    /// Share a conversation card into the joined room.
    ShareCard {
        /// The card to share.
        card_id: CardId,
    },
    /// Join a 1:1 DM room after connecting.
    JoinDmRoom {
        /// The DM room to join.
        dm_room_id: DmRoomId,
    },
    /// Send a text message to a DM room.
    SendDmMessage {
        /// The DM room to send into.
        dm_room_id: DmRoomId,
        /// Message text.
        content: String,
    },
}

impl ClientEvent {
    /// The join event announcing the client in the given conversation,
    /// emitted once per successful connection.
    #[must_use]
    pub fn join_for(conversation: &Conversation) -> Self {
        match conversation {
            Conversation::Room(room_id) => Self::JoinRoom {
                room_id: room_id.clone(),
            },
            Conversation::Dm(dm_room_id) => Self::JoinDmRoom {
                dm_room_id: dm_room_id.clone(),
            },
        }
    }

    /// The send event carrying `content` into the given conversation.
    #[must_use]
    pub fn send_for(conversation: &Conversation, content: impl Into<String>) -> Self {
        match conversation {
            Conversation::Room(_) => Self::SendMessage {
                content: content.into(),
            },
            Conversation::Dm(dm_room_id) => Self::SendDmMessage {
                dm_room_id: dm_room_id.clone(),
                content: content.into(),
            },
        }
    }
}

/// Events the server pushes to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A new message in the joined room (text or card share).
    NewMessage {
        /// The confirmed message.
        message: Message,
    },
    /// A server-generated presence notice in the joined room.
    SystemMessage {
        /// The system message.
        message: Message,
    },
    /// A new message in the joined DM room.
    NewDmMessage {
        /// The confirmed message.
        message: Message,
    },
    /// A server-side error. The payload shape is not guaranteed; use
    /// [`SocketError::from_payload`] to normalize it for display.
    Error {
        /// Raw error payload as sent by the server.
        error: Value,
    },
}

/// A normalized, displayable socket error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

/// Fallback message when a payload carries nothing displayable.
const UNKNOWN_SOCKET_ERROR: &str = "unknown socket error";

impl SocketError {
    /// Create an error with an explicit code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Normalize an arbitrary server error payload into a displayable
    /// error.
    ///
    /// Servers have been observed to send plain strings, objects with a
    /// `message` field (itself sometimes a nested object), and arbitrary
    /// JSON. Whatever arrives must become a string rather than breaking
    /// rendering:
    /// - a string payload is used as-is;
    /// - an object's `message` field is used when it is a string, or
    ///   JSON-stringified when it is some other value;
    /// - anything else is JSON-stringified wholesale.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        let message = match payload {
            Value::String(s) => s.clone(),
            Value::Object(map) => match map.get("message") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => Value::Object(map.clone()).to_string(),
            },
            Value::Null => UNKNOWN_SOCKET_ERROR.to_string(),
            other => other.to_string(),
        };
        Self::new("SOCKET_ERROR", message)
    }

    /// Normalize a connection-level failure description.
    ///
    /// Prefers a structured `description` field when the payload carries
    /// one, falling back to the payload itself via [`Self::from_payload`].
    #[must_use]
    pub fn from_connect_failure(payload: &Value) -> Self {
        let description = payload
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        let message = match description {
            Some(d) => d,
            None => Self::from_payload(payload).message,
        };
        Self::new("CONNECTION_ERROR", message)
    }
}

impl std::fmt::Display for SocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
