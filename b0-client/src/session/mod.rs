//! Per-conversation session facade.
//!
//! [`ChatSession`] is the single object a conversation screen depends on:
//! it wires a connection (dialed through a [`Connector`]), the message
//! cache, and the optimistic send coordinator to one room or DM
//! conversation, and exposes `send_message` / `retry_message` /
//! `reconnect` / `disconnect` plus reactive views of the connection status
//! and the message timeline.
//!
//! Steady-state operations never return errors to the caller: precondition
//! failures surface as [`SessionNotice`]s (transient notifications) and
//! log warnings, connection problems surface through the status watch.
//! The one construction-time throw is opening a session without an auth
//! token, which indicates a caller bug rather than a runtime condition.

pub(crate) mod outbox;
mod router;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use b0_proto::event::{ClientEvent, SocketError};
use b0_proto::ids::{CardId, Conversation};
use b0_proto::message::{MessageStatus, ValidationError, validate_content};

use crate::AuthToken;
use crate::cache::{CachedMessage, MessageCache, Page, TempId};
use crate::channel::{Channel, Connector};
use crate::members::{MemberDirectory, Profile};
use crate::rest::{RestClient, RestError};

use outbox::Outbox;

/// Connection state of a session, published through a watch channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ConnectionStatus {
    /// No live connection.
    #[default]
    Disconnected,
    /// A handshake is in progress.
    Connecting,
    /// Connected and joined to the conversation.
    Connected,
    /// The connection failed; the user may trigger a reconnect.
    Error(SocketError),
}

impl ConnectionStatus {
    /// Whether the session currently has a live connection.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Why a send or retry was rejected before transmission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendRejection {
    /// No live connection; nothing was transmitted.
    #[error("not connected")]
    NotConnected,
    /// The content failed validation.
    #[error("invalid content: {0}")]
    InvalidContent(ValidationError),
    /// The operation only applies to group rooms.
    #[error("only available in a group room")]
    RoomOnly,
    /// No pending send is recorded under the given temp id.
    #[error("no pending send with that id")]
    UnknownTempId,
}

/// Transient, user-facing notifications emitted by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    /// A send or retry was rejected before transmission.
    SendRejected {
        /// Why it was rejected.
        reason: SendRejection,
    },
    /// A send reached the wire but was never confirmed, or could not be
    /// transmitted; the message is marked failed and can be retried.
    SendFailed {
        /// The failed message's temp id.
        temp_id: TempId,
    },
}

/// Errors a session can return from its fallible surface (construction and
/// history loading).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No auth token is available; the caller must sign in first.
    #[error("no auth token available; sign in before opening a session")]
    MissingAuthToken,
    /// No REST client is attached, so history cannot be fetched.
    #[error("no REST client attached; history is unavailable")]
    HistoryUnavailable,
    /// A REST request failed.
    #[error(transparent)]
    Rest(#[from] RestError),
}

/// Bounded backoff for the transport's own reconnect after a
/// server-initiated close.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum reconnect attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Cap on the per-attempt delay.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt: doubling from
    /// `initial_delay`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long an optimistic send waits for its server echo before being
    /// marked failed.
    pub send_timeout: Duration,
    /// Messages per history page.
    pub page_size: usize,
    /// Transport reconnect backoff.
    pub reconnect: ReconnectPolicy,
    /// Buffer size for the notice channel.
    pub notice_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(10),
            page_size: 50,
            reconnect: ReconnectPolicy::default(),
            notice_buffer: 64,
        }
    }
}

/// State shared between the session handle and its background tasks.
pub(crate) struct Shared<C: Connector> {
    pub(crate) connector: C,
    pub(crate) conversation: Conversation,
    pub(crate) me: Profile,
    pub(crate) token: AuthToken,
    pub(crate) config: SessionConfig,
    pub(crate) rest: Option<RestClient>,
    pub(crate) members: MemberDirectory,
    pub(crate) cache_tx: watch::Sender<MessageCache>,
    pub(crate) status_tx: watch::Sender<ConnectionStatus>,
    pub(crate) notice_tx: mpsc::Sender<SessionNotice>,
    pub(crate) outbox: Outbox,
    pub(crate) channel: RwLock<Option<Arc<C::Channel>>>,
    /// Handle of the current connection task, for abort on teardown.
    pub(crate) worker: Mutex<Option<JoinHandle<()>>>,
    /// Generation counter; bumped on every teardown so late events from a
    /// previous generation are dropped instead of mutating current state.
    pub(crate) epoch: AtomicU64,
}

impl<C: Connector> Shared<C> {
    /// Whether `my_epoch` belongs to a torn-down generation.
    pub(crate) fn stale(&self, my_epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != my_epoch
    }

    /// Publish a status change unless the caller's generation is stale.
    pub(crate) fn set_status(&self, my_epoch: u64, status: ConnectionStatus) {
        if !self.stale(my_epoch) {
            self.status_tx.send_replace(status);
        }
    }

    /// The current channel, if any.
    pub(crate) fn current_channel(&self) -> Option<Arc<C::Channel>> {
        self.channel.read().clone()
    }

    /// Emit a transient notice; dropped when the UI is not draining.
    pub(crate) fn notify(&self, notice: SessionNotice) {
        let _ = self.notice_tx.try_send(notice);
    }
}

/// The per-conversation integration point between the UI and the messaging
/// core.
///
/// Construction dials in the background; the UI observes progress through
/// [`status`](Self::status). Dropping the session tears everything down.
pub struct ChatSession<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> ChatSession<C> {
    /// Open a session for `conversation`, dialing through `connector`.
    ///
    /// Returns the session plus the receiver for transient
    /// [`SessionNotice`]s. The connection is established in the
    /// background: the status watch moves `Connecting -> Connected`, or to
    /// `Error` on a failed handshake. Attach a [`RestClient`] to enable
    /// history loading and member refresh.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingAuthToken`] when `token` is empty —
    /// opening a session without a credential is a caller bug.
    pub fn open(
        connector: C,
        conversation: Conversation,
        me: Profile,
        token: AuthToken,
        config: SessionConfig,
        rest: Option<RestClient>,
    ) -> Result<(Self, mpsc::Receiver<SessionNotice>), SessionError> {
        if token.is_empty() {
            return Err(SessionError::MissingAuthToken);
        }

        let (notice_tx, notice_rx) = mpsc::channel(config.notice_buffer);
        let (cache_tx, _) = watch::channel(MessageCache::new());
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);

        let shared = Arc::new(Shared {
            connector,
            conversation,
            me,
            token,
            config,
            rest,
            members: MemberDirectory::new(),
            cache_tx,
            status_tx,
            notice_tx,
            outbox: Outbox::new(),
            channel: RwLock::new(None),
            worker: Mutex::new(None),
            epoch: AtomicU64::new(0),
        });

        let worker = tokio::spawn(router::connection_task(Arc::clone(&shared), 0));
        *shared.worker.lock() = Some(worker);

        Ok((Self { shared }, notice_rx))
    }

    /// The conversation this session is bound to.
    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        &self.shared.conversation
    }

    /// The signed-in user this session sends as.
    #[must_use]
    pub fn current_user(&self) -> &Profile {
        &self.shared.me
    }

    /// Reactive view of the message timeline.
    #[must_use]
    pub fn messages(&self) -> watch::Receiver<MessageCache> {
        self.shared.cache_tx.subscribe()
    }

    /// Reactive view of the connection status.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Whether the session currently has a live connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared
            .current_channel()
            .is_some_and(|c| c.is_connected())
    }

    /// Send a text message optimistically.
    ///
    /// The provisional message appears in the timeline immediately with
    /// status `Sending`; it is replaced in place by the server echo, or
    /// marked `Failed` when no echo arrives within the send timeout.
    /// Precondition failures (not connected, invalid content) emit a
    /// [`SessionNotice::SendRejected`] instead of returning an error.
    pub async fn send_message(&self, content: impl Into<String>) {
        let content = content.into();
        if let Err(e) = validate_content(&content) {
            tracing::warn!(error = %e, "message rejected before send");
            self.shared.notify(SessionNotice::SendRejected {
                reason: SendRejection::InvalidContent(e),
            });
            return;
        }
        dispatch_send(&self.shared, content).await;
    }

    /// Retry a failed send.
    ///
    /// The old entry disappears and a brand-new provisional message (new
    /// temp id, recovered content) is appended at the end of the timeline
    /// — retry is send-from-scratch, never a resume. No-ops with a notice
    /// when the temp id is unknown (e.g. retry pressed twice).
    pub async fn retry_message(&self, temp_id: &TempId) {
        let shared = &self.shared;
        let Some(content) = shared.outbox.peek_content(temp_id) else {
            tracing::warn!(temp_id = %temp_id, "retry requested for unknown send");
            shared.notify(SessionNotice::SendRejected {
                reason: SendRejection::UnknownTempId,
            });
            return;
        };
        if !self.is_connected() {
            tracing::warn!(temp_id = %temp_id, "not connected; retry refused");
            shared.notify(SessionNotice::SendRejected {
                reason: SendRejection::NotConnected,
            });
            return;
        }

        shared.outbox.discard(temp_id);
        shared
            .cache_tx
            .send_modify(|cache| *cache = cache.remove_by_temp_id(temp_id));
        tracing::info!(old_temp_id = %temp_id, "retrying failed send");
        dispatch_send(shared, content).await;
    }

    /// Share a conversation card into a group room.
    ///
    /// Fire-and-forget: the shared card renders when its server echo
    /// arrives. Rejected with a notice on DM sessions.
    pub async fn share_card(&self, card_id: CardId) {
        let shared = &self.shared;
        if shared.conversation.is_dm() {
            shared.notify(SessionNotice::SendRejected {
                reason: SendRejection::RoomOnly,
            });
            return;
        }
        let Some(channel) = shared.current_channel().filter(|c| c.is_connected()) else {
            tracing::warn!("not connected; card not shared");
            shared.notify(SessionNotice::SendRejected {
                reason: SendRejection::NotConnected,
            });
            return;
        };
        if let Err(e) = channel.send(ClientEvent::ShareCard { card_id }).await {
            tracing::warn!(error = %e, "card share failed");
        }
    }

    /// Tear down the connection and rebuild it from scratch.
    ///
    /// This is the user-facing reconnect: it resets error state and
    /// performs a full fresh handshake rather than nudging the transport's
    /// internal retry. Sends still awaiting confirmation are marked failed
    /// — their echoes cannot arrive on the new connection — so the user
    /// gets an immediate retry affordance.
    pub fn reconnect(&self) {
        let shared = &self.shared;
        let epoch = shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(worker) = shared.worker.lock().take() {
            worker.abort();
        }
        *shared.channel.write() = None;

        let orphaned = shared.outbox.abort_timers();
        if !orphaned.is_empty() {
            shared.cache_tx.send_modify(|cache| {
                for temp_id in &orphaned {
                    *cache = cache.update_status(temp_id, MessageStatus::Failed);
                }
            });
            for temp_id in orphaned {
                shared.notify(SessionNotice::SendFailed { temp_id });
            }
        }

        tracing::info!(conversation = %shared.conversation, "rebuilding connection");
        let worker = tokio::spawn(router::connection_task(Arc::clone(shared), epoch));
        *shared.worker.lock() = Some(worker);
    }

    /// Tear the session down: close the connection, cancel every pending
    /// timeout, drop all listeners.
    ///
    /// Idempotent — safe to call repeatedly, and safe on a session that
    /// never successfully connected.
    pub fn disconnect(&self) {
        let shared = &self.shared;
        shared.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(worker) = shared.worker.lock().take() {
            worker.abort();
        }
        *shared.channel.write() = None;
        shared.outbox.clear();
        shared.status_tx.send_replace(ConnectionStatus::Disconnected);
        tracing::info!(conversation = %shared.conversation, "session disconnected");
    }

    /// Load the newest page of history, replacing the cache.
    ///
    /// Intended to run when the conversation view opens, before the first
    /// send. Requires an attached [`RestClient`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::HistoryUnavailable`] without a REST client,
    /// or the underlying [`RestError`].
    pub async fn load_initial_history(&self) -> Result<(), SessionError> {
        let shared = &self.shared;
        let rest = shared.rest.as_ref().ok_or(SessionError::HistoryUnavailable)?;

        let raw = rest
            .fetch_messages(&shared.conversation, None, shared.config.page_size)
            .await?;
        let joined = raw
            .into_iter()
            .map(|m| shared.members.join_sender(m))
            .collect();
        let page = Page::from_history(joined, shared.config.page_size);
        shared
            .cache_tx
            .send_replace(MessageCache::from_initial_page(page));
        Ok(())
    }

    /// Fetch the next older page of history and append it to the cache.
    ///
    /// Returns whether an even older page may exist. Returns `Ok(false)`
    /// without fetching when the cache has no cursor (all history loaded,
    /// or no initial page yet).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::HistoryUnavailable`] without a REST client,
    /// or the underlying [`RestError`].
    pub async fn load_older_messages(&self) -> Result<bool, SessionError> {
        let shared = &self.shared;
        let rest = shared.rest.as_ref().ok_or(SessionError::HistoryUnavailable)?;

        let Some(cursor) = shared.cache_tx.borrow().next_cursor().cloned() else {
            return Ok(false);
        };
        let raw = rest
            .fetch_messages(&shared.conversation, Some(&cursor), shared.config.page_size)
            .await?;
        let joined = raw
            .into_iter()
            .map(|m| shared.members.join_sender(m))
            .collect();
        let page = Page::from_history(joined, shared.config.page_size);
        let more = page.next_cursor.is_some();
        shared
            .cache_tx
            .send_modify(|cache| *cache = cache.push_older_page(page));
        Ok(more)
    }

    /// Refresh the member list from the REST API (group rooms only; a
    /// no-op for DMs).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::HistoryUnavailable`] without a REST client,
    /// or the underlying [`RestError`].
    pub async fn refresh_members(&self) -> Result<(), SessionError> {
        let shared = &self.shared;
        if shared.rest.is_none() {
            return Err(SessionError::HistoryUnavailable);
        }
        refresh_members_inner(shared).await.map_err(SessionError::Rest)
    }
}

impl<C: Connector> Drop for ChatSession<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// The optimistic send sequence shared by `send_message` and
/// `retry_message`.
///
/// Order matters: the provisional entry is inserted *before* transmission
/// so the UI reflects the send immediately regardless of network latency,
/// and the timeout is armed only after a successful hand-off to the
/// transport.
async fn dispatch_send<C: Connector>(shared: &Arc<Shared<C>>, content: String) {
    let Some(channel) = shared.current_channel().filter(|c| c.is_connected()) else {
        tracing::warn!(conversation = %shared.conversation, "not connected; message not sent");
        shared.notify(SessionNotice::SendRejected {
            reason: SendRejection::NotConnected,
        });
        return;
    };

    let temp_id = TempId::generate();
    let provisional =
        CachedMessage::provisional(temp_id.clone(), shared.me.to_sender(), content.clone());
    shared
        .cache_tx
        .send_modify(|cache| *cache = cache.append_incoming(provisional));
    shared.outbox.record(temp_id.clone(), content.clone());
    tracing::debug!(temp_id = %temp_id, "optimistic message inserted");

    let event = ClientEvent::send_for(&shared.conversation, content);
    if let Err(e) = channel.send(event).await {
        tracing::warn!(temp_id = %temp_id, error = %e, "transmit failed");
        shared
            .cache_tx
            .send_modify(|cache| *cache = cache.update_status(&temp_id, MessageStatus::Failed));
        shared.notify(SessionNotice::SendFailed { temp_id });
        return;
    }

    let my_epoch = shared.epoch.load(Ordering::SeqCst);
    let timer_shared = Arc::clone(shared);
    let timer_temp = temp_id.clone();
    let timeout = shared.config.send_timeout;
    let timer = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if timer_shared.stale(my_epoch) {
            return;
        }
        // Reconciliation may have won the race and cleared the timer slot.
        if !timer_shared.outbox.disarm(&timer_temp) {
            return;
        }
        tracing::warn!(temp_id = %timer_temp, "send timed out without confirmation");
        timer_shared
            .cache_tx
            .send_modify(|cache| *cache = cache.update_status(&timer_temp, MessageStatus::Failed));
        timer_shared.notify(SessionNotice::SendFailed {
            temp_id: timer_temp,
        });
    });
    shared.outbox.arm(temp_id, timer);
}

/// Fetch and install the member list for a room conversation.
pub(crate) async fn refresh_members_inner<C: Connector>(
    shared: &Arc<Shared<C>>,
) -> Result<(), RestError> {
    let Some(rest) = shared.rest.as_ref() else {
        return Ok(());
    };
    let Conversation::Room(room_id) = &shared.conversation else {
        return Ok(());
    };
    let members = rest.fetch_members(room_id).await?;
    tracing::debug!(count = members.len(), "member list refreshed");
    shared.members.replace(members);
    Ok(())
}
