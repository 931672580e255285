//! Minimal client for the dungeon room server.
//!
//! This crate provides a focused client for the room server's JSON API:
//! - Polling the canonical room snapshot
//! - Queueing and resolving party turns
//! - Starting a campaign
//! - The single-player chat endpoint
//!
//! Authentication is handled elsewhere; the client only forwards an opaque
//! session cookie when one is configured.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Errors that can occur when talking to the room server.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Room not found")]
    NotFound,

    #[error("Server rejected the request: {0}")]
    Rejected(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the server reported that the room no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}

/// Connection settings for the room server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the server, without the `/api` suffix.
    pub server_url: String,

    /// Opaque session cookie issued by the login flow.
    pub session_cookie: Option<String>,

    /// Whole-request timeout.
    pub timeout: Duration,

    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            session_cookie: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    /// Create a config pointing at the given server.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Read the config from `DELVE_SERVER_URL`, `DELVE_SESSION_COOKIE`
    /// and `DELVE_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DELVE_SERVER_URL") {
            config.server_url = url;
        }
        if let Ok(cookie) = std::env::var("DELVE_SESSION_COOKIE") {
            if !cookie.trim().is_empty() {
                config.session_cookie = Some(cookie);
            }
        }
        if let Ok(secs) = std::env::var("DELVE_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                Error::Config(format!("DELVE_REQUEST_TIMEOUT_SECS is not a number: {secs}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{path}", self.server_url.trim_end_matches('/'))
    }
}

/// Room server client.
#[derive(Clone)]
pub struct RoomClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl RoomClient {
    /// Create a client from the given config.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(cookie) = &config.session_cookie {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(cookie)
                    .map_err(|e| Error::Config(format!("Invalid session cookie: {e}")))?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Create a client from environment variables.
    pub fn from_env() -> Result<Self, Error> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetch the canonical room state.
    pub async fn poll(&self) -> Result<RoomSnapshot, Error> {
        let response = self
            .client
            .get(self.config.endpoint("poll"))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))
    }

    /// Add an action to the room's pending queue.
    pub async fn queue_action(&self, message: &str) -> Result<(), Error> {
        tracing::debug!(len = message.len(), "queueing action");
        let response = self
            .client
            .post(self.config.endpoint("queue_action"))
            .json(&QueueActionRequest { message })
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        check_status(response).await?;
        Ok(())
    }

    /// Ask the server to resolve all pending actions as one turn.
    pub async fn resolve_turn(&self, request: &ResolveRequest) -> Result<Generation, Error> {
        let response = self
            .client
            .post(self.config.endpoint("resolve_turn"))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        parse_generation(check_status(response).await?).await
    }

    /// Reset the room and generate the opening narrative.
    pub async fn start_campaign(&self) -> Result<Generation, Error> {
        let response = self
            .client
            .post(self.config.endpoint("start_campaign"))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        parse_generation(check_status(response).await?).await
    }

    /// Single-player generation: send the whole conversation, get the next
    /// narrator message back.
    pub async fn chat(&self, request: &ChatRequest) -> Result<Generation, Error> {
        let response = self
            .client
            .post(self.config.endpoint("chat"))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        parse_generation(check_status(response).await?).await
    }

    /// Leave the current room.
    pub async fn leave_room(&self) -> Result<(), Error> {
        let response = self
            .client
            .post(self.config.endpoint("leave_room"))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        check_status(response).await?;
        Ok(())
    }

    /// Reset the room's stats, history and queue.
    pub async fn reset(&self) -> Result<(), Error> {
        let response = self
            .client
            .post(self.config.endpoint("reset"))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(Error::NotFound);
    }

    let body = response.text().await.unwrap_or_default();
    if let Some(message) = error_message(&body) {
        return Err(Error::Rejected(message));
    }
    Err(Error::Api {
        status: status.as_u16(),
        message: body,
    })
}

async fn parse_generation(response: reqwest::Response) -> Result<Generation, Error> {
    let body = response
        .text()
        .await
        .map_err(|e| Error::Network(e.to_string()))?;
    Generation::from_body(&body)
}

fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<GenerationBody>(body)
        .ok()
        .and_then(|b| b.error)
}

// ============================================================================
// Public types
// ============================================================================

/// Who authored a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "assistant", alias = "narrator")]
    Narrator,
    #[serde(rename = "user", alias = "player")]
    Player,
}

/// One message of the shared conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn narrator(content: impl Into<String>) -> Self {
        Self {
            role: Role::Narrator,
            content: content.into(),
        }
    }

    pub fn player(content: impl Into<String>) -> Self {
        Self {
            role: Role::Player,
            content: content.into(),
        }
    }
}

/// Canonical room state returned by the poll endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub hp: i32,
    #[serde(default)]
    pub hp_max: Option<i32>,
    pub floor: u32,
    #[serde(default)]
    pub inventory: Vec<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub pending_actions: Vec<String>,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub is_creator: bool,
}

/// Party stats sent along with a turn resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub hp: i32,
    pub floor: u32,
    pub inventory: Vec<String>,
}

/// Body of a resolve-turn request.
#[derive(Debug, Clone, Serialize)]
pub struct ResolveRequest {
    pub system_context: String,
    pub stats: Stats,
}

/// Body of a single-player chat request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<HistoryEntry>,
    pub system_context: String,
}

/// Result of a generation call. `content` is absent when the server
/// answered without narrative text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub content: Option<String>,
}

impl Generation {
    /// Parse a `{content}` / `{error}` response body.
    pub fn from_body(body: &str) -> Result<Self, Error> {
        let parsed: GenerationBody =
            serde_json::from_str(body).map_err(|e| Error::Parse(e.to_string()))?;

        if let Some(error) = parsed.error {
            return Err(Error::Rejected(error));
        }
        Ok(Generation {
            content: parsed.content,
        })
    }

    /// The generated text, if it is present and not blank.
    pub fn text(&self) -> Option<&str> {
        self.content
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct QueueActionRequest<'a> {
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerationBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    error: Option<String>,
}
