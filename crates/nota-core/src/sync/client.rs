//! HTTP client for the sync API

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::models::{Note, NoteId, SyncAction};

/// Errors from talking to the server of record
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (timeout, connection refused)
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Server unreachable or failing (5xx)
    #[error("Server error: {0}")]
    Server(String),

    /// Identity rejected; re-authentication required before further sync
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The server rejected the payload itself (4xx / per-action failure)
    #[error("Rejected by server: {0}")]
    Rejected(String),

    /// Response body did not match the expected shape
    #[error("Invalid response payload: {0}")]
    InvalidPayload(String),
}

impl ClientError {
    /// Whether retrying the same request later could succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Server(_))
    }
}

/// Result of one accepted mutation
#[derive(Debug, Clone)]
pub struct PushOutcome {
    /// Canonical note after the mutation; `None` for deletions
    pub note: Option<Note>,
    /// Server timestamp of the response
    pub timestamp: i64,
}

/// Result of a pull request
#[derive(Debug, Clone)]
pub struct PullResponse {
    /// Notes updated after the requested checkpoint
    pub notes: Vec<Note>,
    /// Server's current timestamp, the client's next checkpoint
    pub timestamp: i64,
}

/// Client interface to the server of record
#[allow(async_fn_in_trait)]
pub trait ServerClient {
    /// Submit a single mutation; returns the canonical result
    async fn push_action(&self, action: &SyncAction) -> Result<PushOutcome, ClientError>;

    /// Fetch notes updated strictly after `since` (server time)
    async fn pull_since(&self, since: i64) -> Result<PullResponse, ClientError>;
}

#[derive(Debug, Deserialize)]
struct ActionResultBody {
    success: bool,
    #[serde(default)]
    note: Option<Note>,
    #[serde(default)]
    #[allow(dead_code)]
    note_id: Option<NoteId>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushResponseBody {
    results: Vec<ActionResultBody>,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct PullResponseBody {
    notes: Vec<Note>,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// HTTP implementation of [`ServerClient`]
#[derive(Clone)]
pub struct HttpServerClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpServerClient {
    /// Create a client for the given server base URL and bearer token
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ClientError::InvalidPayload(
                "server URL must include http:// or https://".to_string(),
            ));
        }
        Ok(Self {
            base_url,
            token: token.into(),
            client: reqwest::Client::builder().build()?,
        })
    }

    /// Base URL this client talks to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the realtime event stream
    #[must_use]
    pub fn events_url(&self) -> String {
        format!("{}/v1/events", self.base_url)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = parse_api_error(status.as_u16(), &body);
        if status == reqwest::StatusCode::UNAUTHORIZED {
            Err(ClientError::Unauthorized(message))
        } else if status.is_client_error() {
            Err(ClientError::Rejected(message))
        } else {
            Err(ClientError::Server(message))
        }
    }
}

impl ServerClient for HttpServerClient {
    async fn push_action(&self, action: &SyncAction) -> Result<PushOutcome, ClientError> {
        let response = self
            .client
            .post(format!("{}/v1/sync", self.base_url))
            .bearer_auth(&self.token)
            .json(&json!({ "actions": [action] }))
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let body = response.json::<PushResponseBody>().await?;
        let result = body.results.into_iter().next().ok_or_else(|| {
            ClientError::InvalidPayload("response did not include an action result".to_string())
        })?;

        if !result.success {
            return Err(ClientError::Rejected(
                result
                    .error
                    .unwrap_or_else(|| "action failed without a reason".to_string()),
            ));
        }

        Ok(PushOutcome {
            note: result.note,
            timestamp: body.timestamp,
        })
    }

    async fn pull_since(&self, since: i64) -> Result<PullResponse, ClientError> {
        let response = self
            .client
            .get(format!("{}/v1/sync", self.base_url))
            .query(&[("since", since)])
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let body = response.json::<PullResponseBody>().await?;
        Ok(PullResponse {
            notes: body.notes,
            timestamp: body.timestamp,
        })
    }
}

fn parse_api_error(status: u16, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({status})", message.trim());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("{trimmed} ({status})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bare_host() {
        assert!(HttpServerClient::new("api.example.com", "t").is_err());
        assert!(HttpServerClient::new("https://api.example.com/", "t").is_ok());
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = HttpServerClient::new("https://api.example.com/", "t").unwrap();
        assert_eq!(client.base_url(), "https://api.example.com");
        assert_eq!(client.events_url(), "https://api.example.com/v1/events");
    }

    #[test]
    fn test_parse_api_error_prefers_json_message() {
        let message = parse_api_error(400, r#"{"error":"bad patch"}"#);
        assert_eq!(message, "bad patch (400)");

        let message = parse_api_error(502, "");
        assert_eq!(message, "HTTP 502");
    }
}
