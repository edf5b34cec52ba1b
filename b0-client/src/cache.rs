//! Paginated, ordered message cache for one conversation.
//!
//! The cache is an immutable-update structure: every operation takes the
//! current value by reference and returns a new value, so consumers can
//! detect change by receiving a fresh snapshot (the session facade
//! publishes snapshots through a `watch` channel). All operations are pure;
//! there is no hidden state.
//!
//! # Page ordering invariant
//!
//! `pages` is kept in **fetch order**: index 0 is the page fetched first,
//! which — because pagination walks backward from "now" — always holds the
//! *newest* messages. Backward pagination appends older pages at higher
//! indices. Within a page, messages are oldest-first (the history endpoint
//! returns newest-first and each page is reversed at construction time).
//! Flattening the pages last-to-first therefore yields the oldest-to-newest
//! display timeline; [`MessageCache::append_incoming`] always targets page
//! 0 so a fresh message lands at the very end of that timeline.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use b0_proto::ids::{CardId, MessageId, UserId};
use b0_proto::message::{Message, MessageKind, MessageStatus, Sender};

/// Client-generated identifier for a provisional (optimistic) message.
///
/// Unique among concurrently-pending sends within the process; never sent
/// over the wire. A temp id lives from the optimistic insert until
/// reconciliation or removal — retry mints a fresh one rather than reusing
/// the old.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TempId(String);

impl TempId {
    /// Mint a new temp id (time-ordered UUID with a recognizable prefix).
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("temp-{}", Uuid::now_v7()))
    }

    /// Return the string representation of this temp id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TempId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a message in the timeline.
///
/// A message has exactly one identity at a time: the server-assigned id
/// once confirmed, or the client-generated temp id while optimistic.
/// Uniqueness within a cache is by this identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageIdentity {
    /// Server-assigned id for a confirmed or historical message.
    Confirmed(MessageId),
    /// Client-generated id for an optimistic message awaiting confirmation.
    Provisional(TempId),
}

impl MessageIdentity {
    /// The server-assigned id, when confirmed.
    #[must_use]
    pub const fn message_id(&self) -> Option<&MessageId> {
        match self {
            Self::Confirmed(id) => Some(id),
            Self::Provisional(_) => None,
        }
    }

    /// The client-generated temp id, while provisional.
    #[must_use]
    pub const fn temp_id(&self) -> Option<&TempId> {
        match self {
            Self::Confirmed(_) => None,
            Self::Provisional(id) => Some(id),
        }
    }
}

/// A message as held in the cache: the wire fields plus client-side
/// delivery state.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMessage {
    /// Confirmed or provisional identity.
    pub identity: MessageIdentity,
    /// Originating user; `None` for system messages.
    pub sender_id: Option<UserId>,
    /// Sender display info, when known.
    pub sender: Option<Sender>,
    /// Message text.
    pub content: String,
    /// Message kind.
    pub kind: MessageKind,
    /// Shared card, for card-share messages.
    pub card_id: Option<CardId>,
    /// Server clock for confirmed messages, client wall clock for
    /// provisional ones.
    pub created_at: DateTime<Utc>,
    /// Delivery status; confirmed and historical messages are `Sent`.
    pub status: MessageStatus,
}

impl CachedMessage {
    /// Wrap a server-confirmed message for the cache.
    #[must_use]
    pub fn confirmed(message: Message) -> Self {
        Self {
            identity: MessageIdentity::Confirmed(message.message_id),
            sender_id: message.sender_id,
            sender: message.sender,
            content: message.content,
            kind: message.kind,
            card_id: message.card_id,
            created_at: message.created_at,
            status: MessageStatus::Sent,
        }
    }

    /// Build a provisional message for an optimistic send.
    ///
    /// Carries the sender's display info so the UI renders it identically
    /// to a confirmed message, and the client wall clock as `created_at`.
    #[must_use]
    pub fn provisional(temp_id: TempId, sender: Sender, content: impl Into<String>) -> Self {
        Self {
            identity: MessageIdentity::Provisional(temp_id),
            sender_id: Some(sender.user_id.clone()),
            sender: Some(sender),
            content: content.into(),
            kind: MessageKind::Text,
            card_id: None,
            created_at: Utc::now(),
            status: MessageStatus::Sending,
        }
    }

    /// The temp id, while this message is provisional.
    #[must_use]
    pub const fn temp_id(&self) -> Option<&TempId> {
        self.identity.temp_id()
    }

    /// The server-assigned id, once this message is confirmed.
    #[must_use]
    pub const fn message_id(&self) -> Option<&MessageId> {
        self.identity.message_id()
    }
}

/// One fetched slice of history.
///
/// Messages are oldest-first within the page. `next_cursor` is the id of
/// the oldest message in the page and requests the next older page; it is
/// absent when the fetch returned fewer messages than requested, which
/// signals that no older page exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Messages in this page, oldest-first.
    pub messages: Vec<CachedMessage>,
    /// Cursor for the next older page, if one exists.
    pub next_cursor: Option<MessageId>,
}

impl Page {
    /// Build a page from a history response.
    ///
    /// The history endpoint returns messages newest-first; the page stores
    /// them reversed (oldest-first). A full response (`>= limit` messages)
    /// means another older page may exist, cursored by the oldest id in
    /// this response.
    #[must_use]
    pub fn from_history(newest_first: Vec<Message>, limit: usize) -> Self {
        let next_cursor = if newest_first.len() >= limit {
            newest_first.last().map(|m| m.message_id.clone())
        } else {
            None
        };
        let messages = newest_first
            .into_iter()
            .rev()
            .map(CachedMessage::confirmed)
            .collect();
        Self {
            messages,
            next_cursor,
        }
    }
}

/// The paginated message cache for one conversation.
///
/// Owned exclusively by that conversation's session; discarded when the
/// conversation view closes. See the module docs for the page ordering
/// invariant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageCache {
    pages: Vec<Page>,
}

impl MessageCache {
    /// An empty cache (no pages).
    #[must_use]
    pub const fn new() -> Self {
        Self { pages: Vec::new() }
    }

    /// Replace the cache with the first fetched page of history.
    #[must_use]
    pub fn from_initial_page(page: Page) -> Self {
        Self { pages: vec![page] }
    }

    /// The pages in fetch order (index 0 = newest).
    #[must_use]
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Total number of messages across all pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.iter().map(|p| p.messages.len()).sum()
    }

    /// Whether the cache holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|p| p.messages.is_empty())
    }

    /// Iterate the display timeline, oldest-to-newest.
    ///
    /// Pages are walked last-to-first (oldest page first), each already
    /// oldest-first internally.
    pub fn timeline(&self) -> impl Iterator<Item = &CachedMessage> {
        self.pages.iter().rev().flat_map(|p| p.messages.iter())
    }

    /// Cursor for fetching the next older page, if one exists.
    ///
    /// This is the `next_cursor` of the oldest fetched page.
    #[must_use]
    pub fn next_cursor(&self) -> Option<&MessageId> {
        self.pages.last().and_then(|p| p.next_cursor.as_ref())
    }

    /// Append a freshly-arrived message to the newest page.
    ///
    /// Creates a single-page cache when empty. If a message with the same
    /// identity is already present anywhere in the cache, returns the cache
    /// unchanged — deduplication is by identity (confirmed id or temp id),
    /// never by content, so two identical-text messages from the same user
    /// are both kept once confirmed.
    #[must_use]
    pub fn append_incoming(&self, message: CachedMessage) -> Self {
        if self.contains_identity(&message.identity) {
            return self.clone();
        }

        let mut next = self.clone();
        if next.pages.is_empty() {
            next.pages.push(Page::default());
        }
        next.pages[0].messages.push(message);
        next
    }

    /// Replace a provisional message with its server-confirmed counterpart.
    ///
    /// The confirmed message is stored with status `Sent` regardless of
    /// what the caller passed. No-op when no entry carries `temp_id` —
    /// callers must not assume the match succeeds, since the entry may
    /// already have timed out and been removed.
    #[must_use]
    pub fn replace_optimistic(&self, temp_id: &TempId, confirmed: CachedMessage) -> Self {
        let confirmed = CachedMessage {
            status: MessageStatus::Sent,
            ..confirmed
        };
        self.map_messages(|m| {
            if m.temp_id() == Some(temp_id) {
                confirmed.clone()
            } else {
                m.clone()
            }
        })
    }

    /// Overwrite the status of the provisional message with `temp_id`.
    ///
    /// No-op when absent.
    #[must_use]
    pub fn update_status(&self, temp_id: &TempId, status: MessageStatus) -> Self {
        self.map_messages(|m| {
            if m.temp_id() == Some(temp_id) {
                CachedMessage {
                    status,
                    ..m.clone()
                }
            } else {
                m.clone()
            }
        })
    }

    /// Remove the provisional message with `temp_id` from whichever page
    /// holds it.
    ///
    /// No-op when absent.
    #[must_use]
    pub fn remove_by_temp_id(&self, temp_id: &TempId) -> Self {
        let pages = self
            .pages
            .iter()
            .map(|page| Page {
                messages: page
                    .messages
                    .iter()
                    .filter(|m| m.temp_id() != Some(temp_id))
                    .cloned()
                    .collect(),
                next_cursor: page.next_cursor.clone(),
            })
            .collect();
        Self { pages }
    }

    /// Find the pending send matching a server echo.
    ///
    /// Scans for a message with status `Sending`, the given sender, and
    /// exactly the given content, returning its temp id. This is how a
    /// server-echoed message is matched back to the optimistic send that
    /// produced it — the server does not echo temp ids. When a user sends
    /// duplicate content twice before either confirms, the first match
    /// wins; that ambiguity is accepted rather than papered over.
    #[must_use]
    pub fn find_pending_by_content(&self, sender_id: &UserId, content: &str) -> Option<TempId> {
        self.pages
            .iter()
            .flat_map(|p| p.messages.iter())
            .find(|m| {
                m.status == MessageStatus::Sending
                    && m.sender_id.as_ref() == Some(sender_id)
                    && m.content == content
                    && m.temp_id().is_some()
            })
            .and_then(|m| m.temp_id().cloned())
    }

    /// Append an older page fetched by backward pagination.
    #[must_use]
    pub fn push_older_page(&self, page: Page) -> Self {
        let mut next = self.clone();
        next.pages.push(page);
        next
    }

    /// Whether any message in the cache has the given identity.
    fn contains_identity(&self, identity: &MessageIdentity) -> bool {
        self.pages
            .iter()
            .flat_map(|p| p.messages.iter())
            .any(|m| m.identity == *identity)
    }

    /// Rebuild every page by mapping each message.
    fn map_messages(&self, f: impl Fn(&CachedMessage) -> CachedMessage) -> Self {
        let pages = self
            .pages
            .iter()
            .map(|page| Page {
                messages: page.messages.iter().map(&f).collect(),
                next_cursor: page.next_cursor.clone(),
            })
            .collect();
        Self { pages }
    }
}
