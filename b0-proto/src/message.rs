//! The conversation-agnostic message shape shared by rooms and DMs.
//!
//! The backend delivers the same logical shape over the socket channel and
//! the paginated history endpoint; group rooms additionally carry system
//! and card-share messages. Serialization is JSON throughout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CardId, MessageId, UserId};

/// Maximum message content length in characters.
///
/// Enforced at the send boundary (the input layer), never by the cache:
/// history may contain whatever the server stored.
pub const MAX_CONTENT_CHARS: usize = 300;

/// What kind of message this is.
///
/// DM conversations only ever carry [`Text`](Self::Text); group rooms also
/// produce card shares and server-generated system notices (join/leave).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A plain text message.
    #[default]
    Text,
    /// A conversation card shared into the room.
    CardShared,
    /// A server-generated presence notice (join/leave).
    System,
}

/// Delivery status of a message from the local client's perspective.
///
/// Confirmed and historical messages are `Sent`; the field is omitted on
/// the wire and defaults accordingly. The only legal transitions are
/// `Sending -> Sent` (reconciliation) and `Sending -> Failed` (timeout).
/// `Failed` is terminal: retry discards the failed record and starts a
/// fresh provisional cycle instead of resurrecting it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Locally originated, awaiting server confirmation.
    Sending,
    /// Confirmed by the server (or historical).
    #[default]
    Sent,
    /// The send timed out without confirmation.
    Failed,
}

/// Display information about a message's sender.
///
/// The server omits this on most payloads; the client joins it in from the
/// cached room member list so provisional and confirmed messages render
/// identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// The sender's user id.
    pub user_id: UserId,
    /// Display nickname, if the profile is complete.
    pub nickname: Option<String>,
    /// Profile emoji, if the profile is complete.
    pub profile_emoji: Option<String>,
}

/// A server-confirmed message, as delivered over the socket channel or the
/// paginated history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned unique identifier.
    pub message_id: MessageId,
    /// The room or DM-room this message belongs to.
    pub conversation_id: String,
    /// Originating user; `None` for system messages.
    pub sender_id: Option<UserId>,
    /// Message text (or the card question text for card shares).
    pub content: String,
    /// The shared card, for `card_shared` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_id: Option<CardId>,
    /// Message kind; absent means plain text.
    #[serde(default)]
    pub kind: MessageKind,
    /// Server-assigned creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Sender display info, when the server includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Sender>,
}

impl Message {
    /// Whether this is a server-generated system message.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.kind == MessageKind::System
    }
}

/// Error returned when outgoing message content fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Content is empty (or whitespace-only).
    #[error("message content is empty")]
    Empty,
    /// Content exceeds the maximum allowed length.
    #[error("message too long ({chars} characters, max {max})")]
    TooLong {
        /// Actual length in characters.
        chars: usize,
        /// Maximum allowed length in characters.
        max: usize,
    },
}

/// Validate outgoing message content at the send boundary.
///
/// Checks that the content is non-empty after trimming and within
/// [`MAX_CONTENT_CHARS`] characters.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for empty or whitespace-only content,
/// or [`ValidationError::TooLong`] when the character count exceeds the
/// limit.
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    let chars = content.chars().count();
    if chars > MAX_CONTENT_CHARS {
        return Err(ValidationError::TooLong {
            chars,
            max: MAX_CONTENT_CHARS,
        });
    }
    Ok(())
}
