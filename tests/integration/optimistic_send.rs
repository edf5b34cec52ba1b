// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items,
    clippy::future_not_send,
    clippy::redundant_pub_crate
)]

//! Integration tests for the optimistic send/reconcile flow.
//!
//! A session over the loopback channel sends messages; the test drives the
//! server end and verifies:
//! - the provisional message appears immediately with status `Sending`
//! - the server echo replaces it in place (one entry, `Sent`, server id)
//! - other users' messages and unmatched echoes append
//! - duplicate echoes are suppressed by confirmed id
//! - system messages append and DM sessions reconcile the same way

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use b0_client::AuthToken;
use b0_client::cache::{MessageCache, MessageIdentity};
use b0_client::channel::Connector;
use b0_client::channel::loopback::{LoopbackConnector, LoopbackServer};
use b0_client::members::Profile;
use b0_client::session::{ChatSession, ConnectionStatus, SessionConfig, SessionNotice};
use b0_proto::event::{ClientEvent, ServerEvent};
use b0_proto::ids::{Conversation, DmRoomId, MessageId, RoomId, UserId};
use b0_proto::message::{Message, MessageKind, MessageStatus};

// =============================================================================
// Helpers
// =============================================================================

async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out waiting for condition")
}

fn me() -> Profile {
    Profile {
        user_id: UserId::new("me"),
        nickname: Some("mina".into()),
        profile_emoji: Some("🎈".into()),
    }
}

fn wire_message(id: &str, sender: &str, content: &str) -> Message {
    Message {
        message_id: MessageId::new(id),
        conversation_id: "r1".into(),
        sender_id: Some(UserId::new(sender)),
        content: content.into(),
        card_id: None,
        kind: MessageKind::Text,
        created_at: Utc::now(),
        sender: None,
    }
}

fn system_message(id: &str, content: &str) -> Message {
    Message {
        message_id: MessageId::new(id),
        conversation_id: "r1".into(),
        sender_id: None,
        content: content.into(),
        card_id: None,
        kind: MessageKind::System,
        created_at: Utc::now(),
        sender: None,
    }
}

/// Open a session on the given conversation, consume the join event, and
/// wait for `Connected`.
async fn open_session(
    conversation: Conversation,
) -> (
    ChatSession<LoopbackConnector>,
    mpsc::Receiver<SessionNotice>,
    LoopbackServer,
) {
    let (connector, mut handles) = LoopbackConnector::new();
    let (session, notices) = ChatSession::open(
        connector,
        conversation,
        me(),
        AuthToken::new("token"),
        SessionConfig::default(),
        None,
    )
    .unwrap();

    let mut server = within(handles.recv()).await.unwrap();
    let join = within(server.next_client_event()).await.unwrap();
    assert!(
        matches!(join, ClientEvent::JoinRoom { .. } | ClientEvent::JoinDmRoom { .. }),
        "expected a join event, got {join:?}"
    );

    let mut status = session.status();
    within(status.wait_for(ConnectionStatus::is_connected))
        .await
        .unwrap();

    (session, notices, server)
}

async fn open_room_session() -> (
    ChatSession<LoopbackConnector>,
    mpsc::Receiver<SessionNotice>,
    LoopbackServer,
) {
    open_session(Conversation::Room(RoomId::new("r1"))).await
}

async fn wait_cache<C: Connector>(
    session: &ChatSession<C>,
    pred: impl FnMut(&MessageCache) -> bool,
) -> MessageCache {
    let mut rx = session.messages();
    within(rx.wait_for(pred)).await.unwrap().clone()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn send_inserts_provisional_immediately() {
    let (session, _notices, mut server) = open_room_session().await;

    session.send_message("hello").await;

    let cache = session.messages().borrow().clone();
    assert_eq!(cache.len(), 1);
    let entry = cache.timeline().next().unwrap().clone();
    assert_eq!(entry.content, "hello");
    assert_eq!(entry.status, MessageStatus::Sending);
    assert!(entry.temp_id().is_some());
    // The provisional entry renders with the sender's display info.
    assert_eq!(
        entry.sender.as_ref().unwrap().nickname.as_deref(),
        Some("mina")
    );

    let event = within(server.next_client_event()).await.unwrap();
    assert_eq!(
        event,
        ClientEvent::SendMessage {
            content: "hello".into()
        }
    );
}

#[tokio::test]
async fn echo_reconciles_to_single_sent_message() {
    let (session, _notices, mut server) = open_room_session().await;

    session.send_message("hello").await;
    let _ = within(server.next_client_event()).await.unwrap();

    server
        .push(ServerEvent::NewMessage {
            message: wire_message("m1", "me", "hello"),
        })
        .await;

    let cache = wait_cache(&session, |c| {
        c.timeline().all(|m| m.status == MessageStatus::Sent)
    })
    .await;

    // Exactly one entry for the logical send: confirmed id, no temp id.
    assert_eq!(cache.len(), 1);
    let entry = cache.timeline().next().unwrap();
    assert_eq!(entry.message_id(), Some(&MessageId::new("m1")));
    assert!(entry.temp_id().is_none());
    assert!(
        cache
            .find_pending_by_content(&UserId::new("me"), "hello")
            .is_none()
    );
}

#[tokio::test]
async fn other_users_message_appends() {
    let (session, _notices, server) = open_room_session().await;

    server
        .push(ServerEvent::NewMessage {
            message: wire_message("m1", "u2", "hi there"),
        })
        .await;

    let cache = wait_cache(&session, |c| c.len() == 1).await;
    let entry = cache.timeline().next().unwrap();
    assert_eq!(entry.sender_id, Some(UserId::new("u2")));
    assert_eq!(entry.status, MessageStatus::Sent);
}

#[tokio::test]
async fn duplicate_echo_is_suppressed() {
    let (session, _notices, server) = open_room_session().await;

    for _ in 0..2 {
        server
            .push(ServerEvent::NewMessage {
                message: wire_message("m1", "u2", "once"),
            })
            .await;
    }
    // A distinct follow-up proves both events were processed.
    server
        .push(ServerEvent::NewMessage {
            message: wire_message("m2", "u2", "twice"),
        })
        .await;

    let cache = wait_cache(&session, |c| c.len() >= 2).await;
    assert_eq!(cache.len(), 2);
    let ids: Vec<_> = cache.timeline().filter_map(|m| m.message_id()).collect();
    assert_eq!(ids, vec![&MessageId::new("m1"), &MessageId::new("m2")]);
}

#[tokio::test]
async fn own_echo_without_pending_match_appends() {
    let (session, _notices, mut server) = open_room_session().await;

    session.send_message("pending text").await;
    let _ = within(server.next_client_event()).await.unwrap();

    // Same sender but different content: no reconciliation target.
    server
        .push(ServerEvent::NewMessage {
            message: wire_message("m1", "me", "other text"),
        })
        .await;

    let cache = wait_cache(&session, |c| c.len() == 2).await;
    let statuses: Vec<_> = cache.timeline().map(|m| m.status).collect();
    assert_eq!(statuses, vec![MessageStatus::Sending, MessageStatus::Sent]);
}

#[tokio::test]
async fn identical_sends_reconcile_one_at_a_time() {
    let (session, _notices, mut server) = open_room_session().await;

    session.send_message("same").await;
    session.send_message("same").await;
    let _ = within(server.next_client_event()).await.unwrap();
    let _ = within(server.next_client_event()).await.unwrap();

    server
        .push(ServerEvent::NewMessage {
            message: wire_message("m1", "me", "same"),
        })
        .await;

    // One of the two provisionals is confirmed; the other is still pending.
    let cache = wait_cache(&session, |c| {
        c.timeline().any(|m| m.status == MessageStatus::Sent)
    })
    .await;
    assert_eq!(cache.len(), 2);
    assert_eq!(
        cache
            .timeline()
            .filter(|m| m.status == MessageStatus::Sending)
            .count(),
        1
    );

    server
        .push(ServerEvent::NewMessage {
            message: wire_message("m2", "me", "same"),
        })
        .await;

    let cache = wait_cache(&session, |c| {
        c.timeline().all(|m| m.status == MessageStatus::Sent)
    })
    .await;
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn system_message_appends_as_non_optimistic() {
    let (session, _notices, server) = open_room_session().await;

    server
        .push(ServerEvent::SystemMessage {
            message: system_message("s1", "juno joined the room"),
        })
        .await;

    let cache = wait_cache(&session, |c| c.len() == 1).await;
    let entry = cache.timeline().next().unwrap();
    assert_eq!(entry.kind, MessageKind::System);
    assert!(entry.sender_id.is_none());
    assert_eq!(entry.status, MessageStatus::Sent);
}

#[tokio::test]
async fn dm_session_sends_and_reconciles_dm_events() {
    let (session, _notices, mut server) =
        open_session(Conversation::Dm(DmRoomId::new("d1"))).await;

    session.send_message("lounge hello").await;

    let event = within(server.next_client_event()).await.unwrap();
    assert_eq!(
        event,
        ClientEvent::SendDmMessage {
            dm_room_id: DmRoomId::new("d1"),
            content: "lounge hello".into()
        }
    );

    let mut echo = wire_message("dm-1", "me", "lounge hello");
    echo.conversation_id = "d1".into();
    server.push(ServerEvent::NewDmMessage { message: echo }).await;

    let cache = wait_cache(&session, |c| {
        c.timeline().all(|m| m.status == MessageStatus::Sent)
    })
    .await;
    assert_eq!(cache.len(), 1);
    assert!(matches!(
        cache.timeline().next().unwrap().identity,
        MessageIdentity::Confirmed(_)
    ));
}

#[tokio::test]
async fn send_while_disconnected_is_rejected_with_notice() {
    let (session, mut notices, mut server) = open_room_session().await;

    server.drop_connection();
    let mut status = session.status();
    within(status.wait_for(|s| *s == ConnectionStatus::Disconnected))
        .await
        .unwrap();

    session.send_message("into the void").await;

    // Nothing inserted, and the UI got a transient notification.
    assert!(session.messages().borrow().is_empty());
    let notice = within(notices.recv()).await.unwrap();
    assert!(matches!(notice, SessionNotice::SendRejected { .. }));
}

#[tokio::test]
async fn empty_and_oversized_content_rejected() {
    let (session, mut notices, _server) = open_room_session().await;

    session.send_message("   ").await;
    let notice = within(notices.recv()).await.unwrap();
    assert!(matches!(notice, SessionNotice::SendRejected { .. }));

    session.send_message("b".repeat(301)).await;
    let notice = within(notices.recv()).await.unwrap();
    assert!(matches!(notice, SessionNotice::SendRejected { .. }));

    assert!(session.messages().borrow().is_empty());
}

#[tokio::test]
async fn share_card_is_room_only_and_fire_and_forget() {
    let (session, _notices, mut server) = open_room_session().await;

    session
        .share_card(b0_proto::ids::CardId::new("card-7"))
        .await;

    let event = within(server.next_client_event()).await.unwrap();
    assert_eq!(
        event,
        ClientEvent::ShareCard {
            card_id: b0_proto::ids::CardId::new("card-7")
        }
    );
    // No optimistic entry for card shares; the card renders on its echo.
    assert!(session.messages().borrow().is_empty());

    let (dm_session, mut dm_notices, _dm_server) =
        open_session(Conversation::Dm(DmRoomId::new("d1"))).await;
    dm_session
        .share_card(b0_proto::ids::CardId::new("card-7"))
        .await;
    let notice = within(dm_notices.recv()).await.unwrap();
    assert!(matches!(notice, SessionNotice::SendRejected { .. }));
}
