//! In-process channel for testing the session stack without a network.
//!
//! [`loopback_pair`] creates a client [`LoopbackChannel`] wired to a
//! [`LoopbackServer`] handle the test drives: read the client's events,
//! push server events, and end the connection with either close
//! provenance. [`LoopbackConnector`] mints a fresh pair per dial and hands
//! the server side to the test, which makes reconnect flows observable —
//! every successful (re)connect delivers a new server handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};

use b0_proto::event::{ClientEvent, ServerEvent};
use b0_proto::ids::Conversation;

use super::{Channel, ChannelError, Connector};
use crate::AuthToken;

/// Buffer size for each direction of a loopback pair.
const LOOPBACK_BUFFER: usize = 64;

/// Why the loopback connection ended.
#[derive(Debug, Clone, Copy)]
enum CloseReason {
    Server,
    Lost,
}

/// State shared between the two ends of a pair.
#[derive(Debug)]
struct PairState {
    connected: AtomicBool,
    close_reason: parking_lot::Mutex<Option<CloseReason>>,
}

impl PairState {
    fn close_error(&self) -> ChannelError {
        match *self.close_reason.lock() {
            Some(CloseReason::Server) => ChannelError::ServerClosed,
            Some(CloseReason::Lost) | None => {
                ChannelError::ConnectionLost("loopback peer dropped".to_string())
            }
        }
    }
}

/// Client end of an in-process channel pair.
#[derive(Debug)]
pub struct LoopbackChannel {
    to_server: mpsc::Sender<ClientEvent>,
    incoming: Mutex<mpsc::Receiver<ServerEvent>>,
    state: Arc<PairState>,
}

/// Server end of an in-process channel pair, driven by tests.
pub struct LoopbackServer {
    from_client: mpsc::Receiver<ClientEvent>,
    to_client: Option<mpsc::Sender<ServerEvent>>,
    state: Arc<PairState>,
}

/// Create a connected channel/server pair.
#[must_use]
pub fn loopback_pair() -> (LoopbackChannel, LoopbackServer) {
    let (client_tx, client_rx) = mpsc::channel(LOOPBACK_BUFFER);
    let (server_tx, server_rx) = mpsc::channel(LOOPBACK_BUFFER);
    let state = Arc::new(PairState {
        connected: AtomicBool::new(true),
        close_reason: parking_lot::Mutex::new(None),
    });

    let channel = LoopbackChannel {
        to_server: client_tx,
        incoming: Mutex::new(server_rx),
        state: Arc::clone(&state),
    };
    let server = LoopbackServer {
        from_client: client_rx,
        to_client: Some(server_tx),
        state,
    };
    (channel, server)
}

impl Channel for LoopbackChannel {
    async fn send(&self, event: ClientEvent) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(self.state.close_error());
        }
        self.to_server
            .send(event)
            .await
            .map_err(|_| self.state.close_error())
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

impl LoopbackServer {
    /// Receive the next event the client emitted, if the client is still
    /// alive.
    pub async fn next_client_event(&mut self) -> Option<ClientEvent> {
        self.from_client.recv().await
    }

    /// Push a server event to the client.
    ///
    /// Returns `false` when the client end is gone.
    pub async fn push(&self, event: ServerEvent) -> bool {
        match &self.to_client {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// End the connection as a deliberate server-side close.
    pub fn close_by_server(&mut self) {
        self.close(CloseReason::Server);
    }

    /// End the connection as a network-level drop.
    pub fn drop_connection(&mut self) {
        self.close(CloseReason::Lost);
    }

    fn close(&mut self, reason: CloseReason) {
        {
            let mut slot = self.state.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.state.connected.store(false, Ordering::Relaxed);
        // Dropping the sender ends the client's recv stream.
        self.to_client = None;
    }
}

/// Connector minting a fresh loopback pair per dial.
///
/// Server handles for each successful connect are delivered through the
/// receiver returned by [`LoopbackConnector::new`]. Set
/// [`refuse_connections`](Self::refuse_connections) to make dials fail,
/// simulating a rejected handshake.
pub struct LoopbackConnector {
    servers: mpsc::UnboundedSender<LoopbackServer>,
    refuse: AtomicBool,
}

impl LoopbackConnector {
    /// Create a connector and the stream of server handles it will mint.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoopbackServer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                servers: tx,
                refuse: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// Make subsequent dials fail with [`ChannelError::Rejected`].
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Relaxed);
    }
}

impl Connector for LoopbackConnector {
    type Channel = LoopbackChannel;

    async fn connect(
        &self,
        conversation: &Conversation,
        token: &AuthToken,
    ) -> Result<LoopbackChannel, ChannelError> {
        if token.is_empty() {
            return Err(ChannelError::Rejected("missing auth token".to_string()));
        }
        if self.refuse.load(Ordering::Relaxed) {
            return Err(ChannelError::Rejected(format!(
                "connection refused for {conversation}"
            )));
        }
        let (channel, server) = loopback_pair();
        // Receiver dropped means the test no longer cares about handles.
        let _ = self.servers.send(server);
        Ok(channel)
    }
}
