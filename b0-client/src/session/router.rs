//! Connection lifecycle driver and inbound event routing.
//!
//! One spawned task per connection generation owns the whole lifecycle:
//! dial, announce, read until closed, and — for server-initiated closes
//! only — the transport's own bounded reconnect loop. A network-level drop
//! ends the task and waits for the user to ask for a reconnect. Every
//! state mutation is guarded by the generation epoch captured at spawn, so
//! events that arrive after a teardown are dropped instead of mutating a
//! session that is no longer displayed.

use std::sync::Arc;

use b0_proto::event::{ClientEvent, ServerEvent, SocketError};
use b0_proto::ids::Conversation;
use b0_proto::message::Message;

use super::{ConnectionStatus, Shared};
use crate::cache::CachedMessage;
use crate::channel::{Channel, ChannelError, Connector};

/// How a read loop ended.
enum ReadOutcome {
    /// The session epoch moved on; stop silently.
    Stale,
    /// The server closed the connection deliberately.
    ServerClosed,
    /// The connection dropped without a server close.
    Lost,
}

/// Drive one connection generation to completion.
pub(super) async fn connection_task<C: Connector>(shared: Arc<Shared<C>>, my_epoch: u64) {
    let Some(mut channel) = dial(&shared, my_epoch).await else {
        return;
    };

    loop {
        match read_until_closed(&shared, my_epoch, &channel).await {
            ReadOutcome::Stale => return,
            ReadOutcome::Lost => {
                // Recovery from a network drop is a user decision.
                shared.set_status(my_epoch, ConnectionStatus::Disconnected);
                return;
            }
            ReadOutcome::ServerClosed => {
                shared.set_status(my_epoch, ConnectionStatus::Disconnected);
                match auto_reconnect(&shared, my_epoch).await {
                    Some(next) => channel = next,
                    None => return,
                }
            }
        }
    }
}

/// Dial a fresh channel, announce the conversation, and publish
/// `Connected`.
///
/// Returns `None` when the dial failed (status set to `Error`) or the
/// epoch moved on mid-handshake.
async fn dial<C: Connector>(
    shared: &Arc<Shared<C>>,
    my_epoch: u64,
) -> Option<Arc<C::Channel>> {
    if shared.stale(my_epoch) {
        return None;
    }
    shared.set_status(my_epoch, ConnectionStatus::Connecting);

    match shared
        .connector
        .connect(&shared.conversation, &shared.token)
        .await
    {
        Ok(channel) => {
            let channel = Arc::new(channel);
            if shared.stale(my_epoch) {
                // Torn down while dialing; discard the late connection.
                return None;
            }
            *shared.channel.write() = Some(Arc::clone(&channel));

            let join = ClientEvent::join_for(&shared.conversation);
            if let Err(e) = channel.send(join).await {
                tracing::warn!(conversation = %shared.conversation, error = %e, "join failed");
                shared.set_status(
                    my_epoch,
                    ConnectionStatus::Error(SocketError::new("CONNECTION_ERROR", e.to_string())),
                );
                return None;
            }

            tracing::info!(conversation = %shared.conversation, "joined conversation");
            shared.set_status(my_epoch, ConnectionStatus::Connected);
            Some(channel)
        }
        Err(e) => {
            tracing::warn!(conversation = %shared.conversation, error = %e, "connect failed");
            shared.set_status(
                my_epoch,
                ConnectionStatus::Error(SocketError::new("CONNECTION_ERROR", e.to_string())),
            );
            None
        }
    }
}

/// Pull events off the channel until it ends, routing each one.
async fn read_until_closed<C: Connector>(
    shared: &Arc<Shared<C>>,
    my_epoch: u64,
    channel: &Arc<C::Channel>,
) -> ReadOutcome {
    loop {
        match channel.recv().await {
            Ok(event) => {
                if shared.stale(my_epoch) {
                    return ReadOutcome::Stale;
                }
                route(shared, my_epoch, event);
            }
            Err(ChannelError::ServerClosed) => {
                tracing::info!(conversation = %shared.conversation, "server closed connection");
                return if shared.stale(my_epoch) {
                    ReadOutcome::Stale
                } else {
                    ReadOutcome::ServerClosed
                };
            }
            Err(e) => {
                tracing::warn!(conversation = %shared.conversation, error = %e, "connection lost");
                return if shared.stale(my_epoch) {
                    ReadOutcome::Stale
                } else {
                    ReadOutcome::Lost
                };
            }
        }
    }
}

/// The transport's own reconnect loop, entered only after a
/// server-initiated close. Bounded attempts with capped doubling backoff.
async fn auto_reconnect<C: Connector>(
    shared: &Arc<Shared<C>>,
    my_epoch: u64,
) -> Option<Arc<C::Channel>> {
    let policy = shared.config.reconnect.clone();
    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.delay_for(attempt)).await;
        if shared.stale(my_epoch) {
            return None;
        }
        tracing::info!(
            attempt,
            max_attempts = policy.max_attempts,
            "transport reconnect attempt"
        );
        if let Some(channel) = dial(shared, my_epoch).await {
            return Some(channel);
        }
        if shared.stale(my_epoch) {
            return None;
        }
    }

    tracing::warn!(
        conversation = %shared.conversation,
        "transport reconnect attempts exhausted"
    );
    shared.set_status(my_epoch, ConnectionStatus::Disconnected);
    None
}

/// Apply one server-pushed event to the session state.
pub(super) fn route<C: Connector>(shared: &Arc<Shared<C>>, my_epoch: u64, event: ServerEvent) {
    match event {
        ServerEvent::NewMessage { message } | ServerEvent::NewDmMessage { message } => {
            apply_new_message(shared, message);
        }
        ServerEvent::SystemMessage { message } => {
            apply_system_message(shared, my_epoch, message);
        }
        ServerEvent::Error { error } => {
            let error = SocketError::from_payload(&error);
            tracing::error!(code = %error.code, message = %error.message, "socket error event");
            shared.set_status(my_epoch, ConnectionStatus::Error(error));
        }
    }
}

/// Handle a new message: reconcile the sender's own echo against its
/// pending optimistic entry, or append.
fn apply_new_message<C: Connector>(shared: &Arc<Shared<C>>, message: Message) {
    let message = shared.members.join_sender(message);
    let is_own = message.sender_id.as_ref() == Some(&shared.me.user_id);
    let content = message.content.clone();
    let confirmed = CachedMessage::confirmed(message);

    let mut reconciled = None;
    shared.cache_tx.send_modify(|cache| {
        // The lookup and the swap happen under the same mutation so a
        // concurrently-firing timeout cannot interleave.
        if is_own && let Some(temp_id) = cache.find_pending_by_content(&shared.me.user_id, &content)
        {
            *cache = cache.replace_optimistic(&temp_id, confirmed.clone());
            reconciled = Some(temp_id);
        } else {
            *cache = cache.append_incoming(confirmed.clone());
        }
    });

    if let Some(temp_id) = reconciled {
        shared.outbox.complete(&temp_id);
        tracing::debug!(temp_id = %temp_id, "optimistic send reconciled");
    }
}

/// Handle a system message: append it and refresh the member list, since
/// presence notices signal membership change.
fn apply_system_message<C: Connector>(shared: &Arc<Shared<C>>, my_epoch: u64, message: Message) {
    let confirmed = CachedMessage::confirmed(message);
    shared
        .cache_tx
        .send_modify(|cache| *cache = cache.append_incoming(confirmed.clone()));

    shared.members.mark_stale();
    if shared.rest.is_some() && matches!(shared.conversation, Conversation::Room(_)) {
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            if shared.stale(my_epoch) {
                return;
            }
            if let Err(e) = super::refresh_members_inner(&shared).await {
                tracing::warn!(error = %e, "member list refresh failed");
            }
        });
    }
}
