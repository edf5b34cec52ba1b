//! Typed identifiers for the B0 protocol.
//!
//! The backend assigns opaque string ids to every resource; these newtypes
//! keep room ids, DM-room ids, user ids, message ids, and conversation-card
//! ids from being confused with one another at compile time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a shared city room (the "living room" group chat).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Create a room identifier from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string representation of this room id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a 1:1 DM room (the "lounge" conversation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DmRoomId(String);

impl DmRoomId {
    /// Create a DM-room identifier from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string representation of this DM-room id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DmRoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a user account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a user identifier from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string representation of this user id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned identifier for a confirmed message.
///
/// Provisional (optimistic) messages do not have one of these; they are
/// keyed by a client-generated temp id until reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Create a message identifier from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string representation of this message id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a conversation card (a prompted ice-breaker question).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(String);

impl CardId {
    /// Create a card identifier from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string representation of this card id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The conversation a session is bound to: a shared city room or a 1:1 DM
/// room.
///
/// The variant selects which wire events the session emits — rooms use
/// `join_room`/`send_message`/`share_card`, DMs use
/// `join_dm_room`/`send_dm_message` — and which REST endpoint serves the
/// message history. It is also the partition key for the message cache:
/// one cache per conversation, never shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Conversation {
    /// A shared city room (group chat).
    Room(RoomId),
    /// A 1:1 DM room.
    Dm(DmRoomId),
}

impl Conversation {
    /// Return the underlying conversation id string (room or DM-room id).
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Room(id) => id.as_str(),
            Self::Dm(id) => id.as_str(),
        }
    }

    /// Whether this conversation is a 1:1 DM room.
    #[must_use]
    pub const fn is_dm(&self) -> bool {
        matches!(self, Self::Dm(_))
    }
}

impl fmt::Display for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Room(id) => write!(f, "room:{id}"),
            Self::Dm(id) => write!(f, "dm:{id}"),
        }
    }
}
