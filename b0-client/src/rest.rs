//! REST collaborator for paginated history, member lists, and the current
//! user's profile.
//!
//! The backend wraps list responses in a `{ "list": [...], "pagination":
//! {...} }` envelope and returns message history newest-first; page
//! assembly (reversing, cursor computation) lives in [`crate::cache::Page`].

use serde::Deserialize;
use url::Url;

use b0_proto::ids::{Conversation, MessageId, RoomId};
use b0_proto::message::Message;

use crate::AuthToken;
use crate::members::Profile;

/// Errors from the REST collaborator.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// The request could not be performed (connection, TLS, decode).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The configured base URL cannot be combined with an endpoint path.
    #[error("invalid endpoint url: {0}")]
    Url(String),
}

/// Pagination block of a list response.
#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    /// Total records on the server.
    pub total: u64,
    /// Offset of this slice.
    pub offset: u64,
    /// Requested page size.
    pub limit: u64,
}

/// The backend's list response envelope.
#[derive(Debug, Deserialize)]
pub struct ListResponse<T> {
    /// The records.
    pub list: Vec<T>,
    /// Pagination info.
    pub pagination: Pagination,
}

/// Client for the B0 REST API, scoped to one bearer token.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    token: AuthToken,
}

impl RestClient {
    /// Create a client for the API at `base_url`.
    ///
    /// The base URL is normalized to end with `/` so endpoint paths join
    /// cleanly.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Url`] if the base URL cannot serve as a join
    /// base.
    pub fn new(base_url: &Url, token: AuthToken) -> Result<Self, RestError> {
        // Reject bases like `mailto:` that cannot take a path.
        if base_url.cannot_be_a_base() {
            return Err(RestError::Url(base_url.to_string()));
        }
        let mut base_url = base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token,
        })
    }

    /// Fetch one page of message history, newest-first.
    ///
    /// `cursor` is the id of the oldest message already seen; absent means
    /// "from now". The response holds up to `limit` messages; fewer than
    /// `limit` signals that no older page exists.
    ///
    /// # Errors
    ///
    /// Returns [`RestError`] on transport failure or a non-success status.
    pub async fn fetch_messages(
        &self,
        conversation: &Conversation,
        cursor: Option<&MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>, RestError> {
        let path = match conversation {
            Conversation::Room(room_id) => format!("rooms/{room_id}/messages"),
            Conversation::Dm(dm_room_id) => format!("dm/rooms/{dm_room_id}/messages"),
        };
        let mut url = self.endpoint(&path)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some(cursor) = cursor {
                query.append_pair("cursor", cursor.as_str());
            }
        }

        let response: ListResponse<Message> = self.get_json(url).await?;
        Ok(response.list)
    }

    /// Fetch the member list of a room.
    ///
    /// # Errors
    ///
    /// Returns [`RestError`] on transport failure or a non-success status.
    pub async fn fetch_members(&self, room_id: &RoomId) -> Result<Vec<Profile>, RestError> {
        let url = self.endpoint(&format!("rooms/{room_id}/members"))?;
        let response: ListResponse<Profile> = self.get_json(url).await?;
        Ok(response.list)
    }

    /// Fetch the signed-in user's profile.
    ///
    /// # Errors
    ///
    /// Returns [`RestError`] on transport failure or a non-success status.
    pub async fn fetch_me(&self) -> Result<Profile, RestError> {
        let url = self.endpoint("users/me")?;
        self.get_json(url).await
    }

    /// Join an endpoint path onto the base URL.
    fn endpoint(&self, path: &str) -> Result<Url, RestError> {
        self.base_url
            .join(path)
            .map_err(|e| RestError::Url(format!("{path}: {e}")))
    }

    /// GET a JSON body with bearer auth, mapping non-success statuses to
    /// [`RestError::Status`].
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, RestError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(self.token.as_str())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body, "REST request failed");
            return Err(RestError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}
