//! Read-mostly side cache of conversation members.
//!
//! The backend omits sender display info from most message payloads; the
//! client joins it in from the room member list so every message renders
//! with a nickname and profile emoji. The list is replaced wholesale on
//! refresh and flagged stale when a system message signals a membership
//! change.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::Deserialize;

use b0_proto::ids::UserId;
use b0_proto::message::{Message, Sender};

/// Display profile for a user, as returned by the member list and profile
/// endpoints. Unknown response fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Profile {
    /// The user's id.
    pub user_id: UserId,
    /// Display nickname, once the profile is complete.
    pub nickname: Option<String>,
    /// Profile emoji, once the profile is complete.
    pub profile_emoji: Option<String>,
}

impl Profile {
    /// The sender display info for messages from this user.
    #[must_use]
    pub fn to_sender(&self) -> Sender {
        Sender {
            user_id: self.user_id.clone(),
            nickname: self.nickname.clone(),
            profile_emoji: self.profile_emoji.clone(),
        }
    }
}

/// The member side cache for one conversation.
///
/// Reads take a snapshot (`Arc`) and writes replace the whole list, so
/// lookups never block on a refresh in progress. A fresh directory starts
/// stale so the first refresh is always warranted.
#[derive(Debug)]
pub struct MemberDirectory {
    members: RwLock<Arc<Vec<Profile>>>,
    stale: AtomicBool,
}

impl MemberDirectory {
    /// Create an empty, stale directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            members: RwLock::new(Arc::new(Vec::new())),
            stale: AtomicBool::new(true),
        }
    }

    /// Replace the member list wholesale and clear the stale flag.
    pub fn replace(&self, members: Vec<Profile>) {
        *self.members.write() = Arc::new(members);
        self.stale.store(false, Ordering::Release);
    }

    /// Snapshot of the current member list.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Profile>> {
        Arc::clone(&self.members.read())
    }

    /// Sender display info for `user_id`, when that user is in the list.
    #[must_use]
    pub fn sender_for(&self, user_id: &UserId) -> Option<Sender> {
        self.snapshot()
            .iter()
            .find(|m| m.user_id == *user_id)
            .map(Profile::to_sender)
    }

    /// Fill in `message.sender` from the member list when the server
    /// omitted it. Messages with no sender id (system messages) and
    /// senders not in the list pass through unchanged.
    #[must_use]
    pub fn join_sender(&self, mut message: Message) -> Message {
        if message.sender.is_none()
            && let Some(sender_id) = &message.sender_id
            && let Some(sender) = self.sender_for(sender_id)
        {
            message.sender = Some(sender);
        }
        message
    }

    /// Flag the list as stale (membership changed server-side).
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    /// Whether the list needs a refresh.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }
}

impl Default for MemberDirectory {
    fn default() -> Self {
        Self::new()
    }
}
