//! Production WebSocket channel.
//!
//! Dials the B0 socket endpoint with the bearer token in the
//! `Authorization` header and the target conversation in the query string;
//! the server validates both during the HTTP upgrade, so a bad token
//! surfaces as a rejected handshake rather than a live connection that
//! errors later. A background reader task decodes JSON frames into
//! [`ServerEvent`]s; malformed frames are logged and skipped, never fatal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use b0_proto::codec;
use b0_proto::event::{ClientEvent, ServerEvent, SocketError};
use b0_proto::ids::Conversation;

use super::{Channel, ChannelError, Connector};
use crate::AuthToken;

/// Write half of the WebSocket connection.
type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Read half of the WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for the connect handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffer size for the inbound event queue.
const INCOMING_BUFFER: usize = 256;

/// Why the connection ended, recorded by the reader task.
#[derive(Debug, Clone)]
enum CloseReason {
    /// The server sent a close frame.
    Server,
    /// The stream errored or ended without a close frame.
    Lost(String),
}

/// State shared between the channel handle and its reader task.
#[derive(Debug)]
struct ChannelState {
    connected: AtomicBool,
    close_reason: parking_lot::Mutex<Option<CloseReason>>,
}

impl ChannelState {
    fn close_error(&self) -> ChannelError {
        match self.close_reason.lock().clone() {
            Some(CloseReason::Server) => ChannelError::ServerClosed,
            Some(CloseReason::Lost(detail)) => ChannelError::ConnectionLost(detail),
            None => ChannelError::ConnectionLost("channel closed".to_string()),
        }
    }
}

/// Connector dialing the B0 socket endpoint over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    socket_url: Url,
    connect_timeout: Duration,
}

impl WsConnector {
    /// Create a connector for the socket endpoint at `socket_url`
    /// (`ws://` or `wss://`).
    #[must_use]
    pub fn new(socket_url: Url) -> Self {
        Self {
            socket_url,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the connect handshake timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Build the handshake URL carrying the target conversation.
    fn handshake_url(&self, conversation: &Conversation) -> Url {
        let mut url = self.socket_url.clone();
        {
            let mut query = url.query_pairs_mut();
            match conversation {
                Conversation::Room(room_id) => {
                    query.append_pair("room_id", room_id.as_str());
                }
                Conversation::Dm(dm_room_id) => {
                    query.append_pair("dm_room_id", dm_room_id.as_str());
                }
            }
        }
        url
    }
}

impl Connector for WsConnector {
    type Channel = WsChannel;

    async fn connect(
        &self,
        conversation: &Conversation,
        token: &AuthToken,
    ) -> Result<WsChannel, ChannelError> {
        let url = self.handshake_url(conversation);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::Rejected(format!("invalid socket url: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
            .map_err(|_| ChannelError::Rejected("auth token is not header-safe".to_string()))?;
        request
            .headers_mut()
            .insert(tokio_tungstenite::tungstenite::http::header::AUTHORIZATION, bearer);

        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(request))
                .await
                .map_err(|_| {
                    tracing::warn!(url = %url, "socket connect timed out");
                    ChannelError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = %url, err = %e, "socket connect failed");
                    map_ws_connect_error(e)
                })?;

        tracing::info!(conversation = %conversation, "socket connected");

        let (sink, reader) = ws_stream.split();
        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        let state = Arc::new(ChannelState {
            connected: AtomicBool::new(true),
            close_reason: parking_lot::Mutex::new(None),
        });

        let reader_handle = tokio::spawn(reader_loop(reader, tx, Arc::clone(&state)));

        Ok(WsChannel {
            sink: Mutex::new(sink),
            incoming: Mutex::new(rx),
            state,
            reader_handle,
        })
    }
}

/// A live WebSocket connection to one conversation's channel.
#[derive(Debug)]
pub struct WsChannel {
    /// Write half, locked for concurrent senders.
    sink: Mutex<WsSink>,
    /// Events decoded by the background reader task.
    incoming: Mutex<mpsc::Receiver<ServerEvent>>,
    /// Connection state shared with the reader task.
    state: Arc<ChannelState>,
    /// Reader task handle, aborted on drop.
    reader_handle: tokio::task::JoinHandle<()>,
}

impl Channel for WsChannel {
    async fn send(&self, event: ClientEvent) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(self.state.close_error());
        }

        let frame = codec::encode_client(&event)?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame.into())).await.map_err(|e| {
            tracing::warn!(err = %e, "socket send failed");
            self.state.connected.store(false, Ordering::Relaxed);
            let mut reason = self.state.close_reason.lock();
            if reason.is_none() {
                *reason = Some(CloseReason::Lost(e.to_string()));
            }
            drop(reason);
            self.state.close_error()
        })
    }

    async fn recv(&self) -> Result<ServerEvent, ChannelError> {
        let mut rx = self.incoming.lock().await;
        match rx.recv().await {
            Some(event) => Ok(event),
            None => Err(self.state.close_error()),
        }
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Relaxed)
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Background task decoding inbound frames into [`ServerEvent`]s.
///
/// Malformed frames are logged and skipped. The close reason is recorded
/// when the stream ends so [`Channel::recv`] can report who ended the
/// connection.
async fn reader_loop(
    mut reader: WsReader,
    tx: mpsc::Sender<ServerEvent>,
    state: Arc<ChannelState>,
) {
    let mut reason = None;
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => match codec::decode_server(text.as_str()) {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        // Channel handle dropped; nothing left to deliver to.
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed socket frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("socket closed by server");
                reason = Some(CloseReason::Server);
                break;
            }
            Ok(
                Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_),
            ) => {}
            Err(e) => {
                tracing::warn!(err = %e, "socket read error");
                reason = Some(CloseReason::Lost(e.to_string()));
                break;
            }
        }
    }

    state.connected.store(false, Ordering::Relaxed);
    let mut slot = state.close_reason.lock();
    if slot.is_none() {
        *slot = Some(reason.unwrap_or_else(|| CloseReason::Lost("stream ended".to_string())));
    }
}

/// Map a handshake failure to a [`ChannelError`].
///
/// An HTTP response during the upgrade means the server actively refused
/// the handshake (invalid/expired token, unknown conversation); its JSON
/// body, when present, is normalized for display.
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> ChannelError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Http(response) => {
            let status = response.status();
            let body = response.into_body().unwrap_or_default();
            let message = serde_json::from_slice::<serde_json::Value>(&body)
                .map(|v| SocketError::from_connect_failure(&v).message)
                .unwrap_or_else(|_| format!("handshake failed with status {status}"));
            ChannelError::Rejected(message)
        }
        WsError::Io(io_err) => ChannelError::Io(io_err),
        other => ChannelError::ConnectionLost(other.to_string()),
    }
}
