// Test-specific lint overrides: property tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items,
    clippy::redundant_pub_crate
)]

//! Property-based tests for the message cache laws.
//!
//! Uses proptest to verify, for arbitrary operation sequences:
//! 1. Dedup: no two messages with the same confirmed id survive any
//!    sequence of appends.
//! 2. Pagination order law: flattening pages of a backward-paginated
//!    history yields the original oldest-to-newest sequence with no gaps
//!    or duplicates, for any page-size split and any number of live
//!    appends.
//! 3. Reconciliation exactness: reconciling a pending send leaves exactly
//!    one message for that logical send and removes its temp id.
//! 4. Status transitions: update/replace/remove operations never
//!    reorder the timeline.

use proptest::prelude::*;

use chrono::{TimeZone, Utc};

use b0_client::cache::{CachedMessage, MessageCache, Page, TempId};
use b0_proto::ids::{MessageId, UserId};
use b0_proto::message::{Message, MessageKind, MessageStatus, Sender};

// --- Builders ---

fn wire_message(id: u32, sender: &str, content: &str) -> Message {
    let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    Message {
        message_id: MessageId::new(format!("m{id}")),
        conversation_id: "r1".into(),
        sender_id: Some(UserId::new(sender)),
        content: content.into(),
        card_id: None,
        kind: MessageKind::Text,
        created_at: base + chrono::Duration::seconds(i64::from(id)),
        sender: None,
    }
}

fn sender(user: &str) -> Sender {
    Sender {
        user_id: UserId::new(user),
        nickname: Some(user.to_string()),
        profile_emoji: None,
    }
}

/// Build a cache the way the client does: initial newest page first, then
/// older pages, from a full oldest-to-newest history split into chunks of
/// `page_size`.
fn paginate(history: &[Message], page_size: usize) -> MessageCache {
    let newest_first: Vec<Message> = history.iter().rev().cloned().collect();
    let mut chunks = newest_first.chunks(page_size);

    let Some(first) = chunks.next() else {
        return MessageCache::new();
    };
    let mut cache = MessageCache::from_initial_page(Page::from_history(first.to_vec(), page_size));
    for chunk in chunks {
        cache = cache.push_older_page(Page::from_history(chunk.to_vec(), page_size));
    }
    cache
}

fn timeline_ids(cache: &MessageCache) -> Vec<String> {
    cache
        .timeline()
        .filter_map(|m| m.message_id().map(|id| id.as_str().to_string()))
        .collect()
}

// --- Strategies ---

/// A sequence of appends drawing confirmed ids from a small pool, so
/// collisions are frequent.
fn arb_append_ids() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(0u32..10, 0..60)
}

proptest! {
    /// Dedup law: appending any sequence of confirmed messages never
    /// produces two entries with the same id.
    #[test]
    fn appends_never_duplicate_confirmed_ids(ids in arb_append_ids()) {
        let mut cache = MessageCache::new();
        for id in &ids {
            cache = cache.append_incoming(CachedMessage::confirmed(
                wire_message(*id, "u1", &format!("text {id}")),
            ));
        }

        let seen = timeline_ids(&cache);
        let unique: std::collections::HashSet<&String> = seen.iter().collect();
        prop_assert_eq!(seen.len(), unique.len());

        // Every distinct appended id is present exactly once.
        let distinct: std::collections::HashSet<u32> = ids.iter().copied().collect();
        prop_assert_eq!(seen.len(), distinct.len());
    }

    /// Pagination order law: for any history length, page size, and
    /// number of live appends, the flattened timeline is the original
    /// oldest-to-newest sequence with no gaps or duplicates.
    #[test]
    fn pagination_preserves_chronological_order(
        history_len in 0usize..120,
        page_size in 1usize..60,
        live_appends in 0u32..10,
    ) {
        let history: Vec<Message> = (0..history_len)
            .map(|i| wire_message(u32::try_from(i).unwrap(), "u1", &format!("msg {i}")))
            .collect();

        let mut cache = paginate(&history, page_size);

        // Live messages arrive after pagination and append at the end.
        for j in 0..live_appends {
            let id = u32::try_from(history_len).unwrap() + j;
            cache = cache.append_incoming(CachedMessage::confirmed(
                wire_message(id, "u2", &format!("live {j}")),
            ));
        }

        let expected: Vec<String> = (0..u32::try_from(history_len).unwrap() + live_appends)
            .map(|i| format!("m{i}"))
            .collect();
        prop_assert_eq!(timeline_ids(&cache), expected);
    }

    /// Reconciliation exactness: after reconciling, exactly one message
    /// exists for the logical send — confirmed id, `Sent`, no pending
    /// temp id left behind.
    #[test]
    fn reconcile_leaves_exactly_one_entry(
        pending_count in 1usize..6,
        reconcile_index in 0usize..6,
        noise in arb_append_ids(),
    ) {
        let reconcile_index = reconcile_index % pending_count;
        let user = UserId::new("me");

        let mut cache = MessageCache::new();
        // Background noise from other users.
        for id in &noise {
            cache = cache.append_incoming(CachedMessage::confirmed(
                wire_message(1000 + id, "u2", "noise"),
            ));
        }

        // Distinct-content pending sends.
        let mut temp_ids = Vec::new();
        for i in 0..pending_count {
            let temp = TempId::generate();
            temp_ids.push(temp.clone());
            cache = cache.append_incoming(CachedMessage::provisional(
                temp,
                sender("me"),
                format!("pending {i}"),
            ));
        }

        // A server echo for one of them arrives.
        let content = format!("pending {reconcile_index}");
        let found = cache.find_pending_by_content(&user, &content);
        prop_assert_eq!(found.clone(), Some(temp_ids[reconcile_index].clone()));

        let confirmed = CachedMessage::confirmed(wire_message(2000, "me", &content));
        cache = cache.replace_optimistic(&found.unwrap(), confirmed);

        // Exactly one entry for that content, confirmed and sent.
        let matches: Vec<_> = cache
            .timeline()
            .filter(|m| m.content == content)
            .collect();
        prop_assert_eq!(matches.len(), 1);
        prop_assert_eq!(matches[0].status, MessageStatus::Sent);
        prop_assert!(matches[0].temp_id().is_none());

        // The reconciled temp id no longer matches as pending.
        prop_assert!(cache.find_pending_by_content(&user, &content).is_none());

        // The other pending sends are untouched.
        let still_pending = cache
            .timeline()
            .filter(|m| m.status == MessageStatus::Sending)
            .count();
        prop_assert_eq!(still_pending, pending_count - 1);
    }

    /// Status updates, replacement, and removal never reorder the
    /// remaining timeline.
    #[test]
    fn mutations_preserve_relative_order(
        history_len in 2usize..40,
        page_size in 1usize..20,
    ) {
        let history: Vec<Message> = (0..history_len)
            .map(|i| wire_message(u32::try_from(i).unwrap(), "u1", &format!("msg {i}")))
            .collect();
        let cache = paginate(&history, page_size);

        // Insert a provisional entry, then fail and remove it.
        let temp = TempId::generate();
        let cache = cache.append_incoming(CachedMessage::provisional(
            temp.clone(),
            sender("me"),
            "mine",
        ));
        let cache = cache.update_status(&temp, MessageStatus::Failed);
        let cache = cache.remove_by_temp_id(&temp);

        // Unrelated no-op mutations against an id that may or may not
        // exist do not disturb order either.
        let ghost = TempId::generate();
        let cache = cache.update_status(&ghost, MessageStatus::Failed);

        let expected: Vec<String> = (0..history_len).map(|i| format!("m{i}")).collect();
        prop_assert_eq!(timeline_ids(&cache), expected);
    }
}
