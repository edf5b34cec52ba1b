//! Socket channel abstraction for the B0 messaging core.
//!
//! Defines the [`Channel`] trait a live room-scoped connection must
//! satisfy, plus the [`Connector`] factory that dials fresh channels —
//! reconnect-from-scratch is "ask the connector again". Concrete
//! implementations:
//! - [`ws::WsChannel`] — production WebSocket channel
//! - [`loopback::LoopbackChannel`] — in-process channel for testing

pub mod loopback;
pub mod ws;

use b0_proto::codec::CodecError;
use b0_proto::event::{ClientEvent, ServerEvent};
use b0_proto::ids::Conversation;

use crate::AuthToken;

/// Errors that can occur on a socket channel.
///
/// The two closed variants distinguish *who* ended the connection: a
/// server-initiated close triggers the transport's own reconnect, while a
/// lost connection waits for the user to ask for one.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The server closed the connection deliberately.
    #[error("connection closed by server")]
    ServerClosed,

    /// The connection dropped without a server close (network failure,
    /// stream ended).
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The server refused the handshake (bad or expired token, unknown
    /// conversation).
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// Dialing did not complete within the connect timeout.
    #[error("connect timed out")]
    Timeout,

    /// A frame could not be encoded.
    #[error("channel codec error: {0}")]
    Codec(#[from] CodecError),

    /// An underlying I/O error occurred.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A live, room-scoped socket connection.
///
/// A channel is bound to one conversation for its whole life; changing
/// conversations means dialing a new channel. Events arrive in server
/// delivery order.
pub trait Channel: Send + Sync {
    /// Emit an event to the server.
    ///
    /// Returns once the event is handed to the transport; delivery is not
    /// guaranteed — confirmation comes back as a server event.
    fn send(
        &self,
        event: ClientEvent,
    ) -> impl std::future::Future<Output = Result<(), ChannelError>> + Send;

    /// Receive the next server-pushed event.
    ///
    /// Blocks asynchronously until an event arrives. Once the connection
    /// ends, returns [`ChannelError::ServerClosed`] or
    /// [`ChannelError::ConnectionLost`] according to who ended it.
    fn recv(&self) -> impl std::future::Future<Output = Result<ServerEvent, ChannelError>> + Send;

    /// Whether the connection is currently up.
    fn is_connected(&self) -> bool;
}

/// Factory for dialing fresh channels.
///
/// Every connect is a full handshake carrying the bearer token and the
/// target conversation; there is no partial-state resume.
pub trait Connector: Send + Sync + 'static {
    /// The channel type this connector produces.
    type Channel: Channel + 'static;

    /// Dial a new channel for `conversation`, authenticating with `token`.
    fn connect(
        &self,
        conversation: &Conversation,
        token: &AuthToken,
    ) -> impl std::future::Future<Output = Result<Self::Channel, ChannelError>> + Send;
}
