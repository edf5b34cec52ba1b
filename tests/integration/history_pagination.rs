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

//! Integration tests for cursor-paginated history against an in-process
//! REST stub.
//!
//! The stub serves 80 messages newest-first in pages of up to 50. Tests
//! verify the pagination order law (flattened pages display oldest-first
//! with no gaps or duplicates), the interplay of live appends with
//! backward pagination, and member-list sender joining.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use url::Url;

use b0_client::AuthToken;
use b0_client::channel::loopback::{LoopbackConnector, LoopbackServer};
use b0_client::members::Profile;
use b0_client::rest::{RestClient, RestError};
use b0_client::session::{ChatSession, ConnectionStatus, SessionConfig, SessionNotice};
use b0_proto::event::ServerEvent;
use b0_proto::ids::{Conversation, MessageId, RoomId, UserId};
use b0_proto::message::{Message, MessageKind};

const HISTORY_LEN: usize = 80;

async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out waiting for condition")
}

// =============================================================================
// REST stub
// =============================================================================

#[derive(Clone)]
struct ApiState {
    /// Full history, newest-first (as the backend returns it).
    newest_first: Arc<Vec<Message>>,
}

/// `m1` (oldest) through `m80` (newest), all from user `u7`.
fn build_history() -> Vec<Message> {
    let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    (1..=HISTORY_LEN)
        .rev()
        .map(|i| Message {
            message_id: MessageId::new(format!("m{i}")),
            conversation_id: "r1".into(),
            sender_id: Some(UserId::new("u7")),
            content: format!("msg {i}"),
            card_id: None,
            kind: MessageKind::Text,
            created_at: base + chrono::Duration::seconds(i64::try_from(i).unwrap()),
            sender: None,
        })
        .collect()
}

async fn messages_handler(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let limit: usize = params
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(50);
    let start = match params.get("cursor") {
        Some(cursor) => state
            .newest_first
            .iter()
            .position(|m| m.message_id.as_str() == cursor)
            .map_or(state.newest_first.len(), |i| i + 1),
        None => 0,
    };
    let slice: Vec<&Message> = state.newest_first.iter().skip(start).take(limit).collect();
    Json(json!({
        "list": slice,
        "pagination": {"total": state.newest_first.len(), "offset": start, "limit": limit}
    }))
}

async fn members_handler() -> Json<Value> {
    Json(json!({
        "list": [
            {"user_id": "u7", "nickname": "juno", "profile_emoji": "🌙"},
            {"user_id": "me", "nickname": "mina", "profile_emoji": "🎈"}
        ],
        "pagination": {"total": 2, "offset": 0, "limit": 50}
    }))
}

async fn me_handler() -> Json<Value> {
    Json(json!({"user_id": "me", "nickname": "mina", "profile_emoji": "🎈"}))
}

async fn broken_handler() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

/// Serve the stub API; returns its base URL.
async fn serve_api() -> Url {
    let state = ApiState {
        newest_first: Arc::new(build_history()),
    };
    let app = Router::new()
        .route("/api/rooms/{room_id}/messages", get(messages_handler))
        .route("/api/rooms/{room_id}/members", get(members_handler))
        .route("/api/users/me", get(me_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Url::parse(&format!("http://{addr}/api/")).unwrap()
}

// =============================================================================
// Helpers
// =============================================================================

fn me() -> Profile {
    Profile {
        user_id: UserId::new("me"),
        nickname: Some("mina".into()),
        profile_emoji: None,
    }
}

async fn open_session_with_rest() -> (
    ChatSession<LoopbackConnector>,
    mpsc::Receiver<SessionNotice>,
    LoopbackServer,
) {
    let base = serve_api().await;
    let rest = RestClient::new(&base, AuthToken::new("token")).unwrap();

    let (connector, mut handles) = LoopbackConnector::new();
    let (session, notices) = ChatSession::open(
        connector,
        Conversation::Room(RoomId::new("r1")),
        me(),
        AuthToken::new("token"),
        SessionConfig::default(),
        Some(rest),
    )
    .unwrap();

    let mut server = within(handles.recv()).await.unwrap();
    let _ = within(server.next_client_event()).await.unwrap(); // join
    let mut status = session.status();
    within(status.wait_for(ConnectionStatus::is_connected))
        .await
        .unwrap();

    (session, notices, server)
}

fn timeline_ids(session: &ChatSession<LoopbackConnector>) -> Vec<String> {
    session
        .messages()
        .borrow()
        .timeline()
        .filter_map(|m| m.message_id().map(|id| id.as_str().to_string()))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn initial_and_older_pages_flatten_oldest_first() {
    let (session, _notices, _server) = open_session_with_rest().await;

    session.load_initial_history().await.unwrap();
    let ids = timeline_ids(&session);
    assert_eq!(ids.len(), 50);
    assert_eq!(ids.first().map(String::as_str), Some("m31"));
    assert_eq!(ids.last().map(String::as_str), Some("m80"));

    // The remaining 30 messages arrive as one short (final) page.
    let more = session.load_older_messages().await.unwrap();
    assert!(!more);

    let ids = timeline_ids(&session);
    assert_eq!(ids.len(), HISTORY_LEN);
    let expected: Vec<String> = (1..=HISTORY_LEN).map(|i| format!("m{i}")).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn load_older_without_cursor_is_a_noop() {
    let (session, _notices, _server) = open_session_with_rest().await;

    session.load_initial_history().await.unwrap();
    assert!(!session.load_older_messages().await.unwrap());
    let len_after_full_load = session.messages().borrow().len();

    // All history fetched: further calls change nothing.
    assert!(!session.load_older_messages().await.unwrap());
    assert_eq!(session.messages().borrow().len(), len_after_full_load);
}

#[tokio::test]
async fn live_appends_interleave_with_backward_pagination() {
    let (session, _notices, server) = open_session_with_rest().await;

    session.load_initial_history().await.unwrap();

    // A live message arrives before the older page is fetched.
    server
        .push(ServerEvent::NewMessage {
            message: Message {
                message_id: MessageId::new("m81"),
                conversation_id: "r1".into(),
                sender_id: Some(UserId::new("u7")),
                content: "fresh".into(),
                card_id: None,
                kind: MessageKind::Text,
                created_at: Utc::now(),
                sender: None,
            },
        })
        .await;
    let mut messages = session.messages();
    within(messages.wait_for(|c| c.len() == 51)).await.unwrap();

    session.load_older_messages().await.unwrap();

    let ids = timeline_ids(&session);
    assert_eq!(ids.len(), HISTORY_LEN + 1);
    // Oldest-first throughout, live append still last.
    assert_eq!(ids.first().map(String::as_str), Some("m1"));
    assert_eq!(ids.last().map(String::as_str), Some("m81"));
    // No duplicates anywhere.
    let unique: std::collections::HashSet<&String> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len());
}

#[tokio::test]
async fn member_refresh_joins_senders_onto_history() {
    let (session, _notices, _server) = open_session_with_rest().await;

    session.refresh_members().await.unwrap();
    session.load_initial_history().await.unwrap();

    let cache = session.messages().borrow().clone();
    let entry = cache.timeline().next().unwrap();
    assert_eq!(
        entry.sender.as_ref().and_then(|s| s.nickname.as_deref()),
        Some("juno")
    );
}

#[tokio::test]
async fn fetch_me_returns_the_signed_in_profile() {
    let base = serve_api().await;
    let rest = RestClient::new(&base, AuthToken::new("token")).unwrap();

    let profile = rest.fetch_me().await.unwrap();
    assert_eq!(profile.user_id, UserId::new("me"));
    assert_eq!(profile.nickname.as_deref(), Some("mina"));
}

#[tokio::test]
async fn non_success_status_surfaces_as_rest_error() {
    let app = Router::new().route("/api/users/me", get(broken_handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let base = Url::parse(&format!("http://{addr}/api/")).unwrap();

    let rest = RestClient::new(&base, AuthToken::new("token")).unwrap();
    let err = rest.fetch_me().await.unwrap_err();
    assert!(matches!(err, RestError::Status { status: 500, .. }));
}
