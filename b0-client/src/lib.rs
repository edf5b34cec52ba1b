//! B0 client messaging core.
//!
//! Unifies three asynchronous sources of truth — locally-originated
//! optimistic sends, server-confirmed echoes over the socket channel, and
//! cursor-paginated REST history — into one consistent, deduplicated,
//! order-preserving message timeline per conversation.

pub mod cache;
pub mod channel;
pub mod config;
pub mod members;
pub mod rest;
pub mod session;

/// Bearer token snapshot used for the socket handshake and the REST API.
///
/// Captured when a session opens; a token refresh takes effect on the next
/// connect, not on a live connection.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a bearer token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the token is empty (no credential available).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for AuthToken {
    // The token value never appears in logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken(..)")
    }
}
