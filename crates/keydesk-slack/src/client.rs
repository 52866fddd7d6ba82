//! Slack Web API client.
//!
//! A thin wrapper over `reqwest` that knows the handful of methods the bot
//! calls. Each call is a form-encoded POST with a bearer token; the JSON
//! reply is checked for `"ok": true` and the `error` code is mapped onto
//! [`BusError`].

use std::fmt;
use std::time::Duration;

use keydesk_core::{ChannelId, UserId};
use keydesk_protocol::{BusError, BusResult, ChannelInfo};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Production Web API endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://slack.com/api";

/// Page size for `conversations.list`.
const CONVERSATIONS_PAGE_LIMIT: &str = "1000";

/// Error codes that mean the token itself is bad.
const AUTH_ERROR_CODES: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
];

// ============================================================================
// Configuration
// ============================================================================

/// Credentials and endpoint for a Slack workspace.
#[derive(Clone)]
pub struct SlackConfig {
    /// Bot user OAuth token (`xoxb-...`).
    pub bot_token: String,

    /// App-level token with `connections:write` (`xapp-...`).
    pub app_token: String,

    /// Base URL for Web API calls.
    pub api_base_url: String,

    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl SlackConfig {
    pub fn new(bot_token: impl Into<String>, app_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            app_token: app_token.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

// Tokens never reach the logs.
impl fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackConfig")
            .field("bot_token", &"<redacted>")
            .field("app_token", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

// ============================================================================
// Response shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct AuthTest {
    user_id: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    team: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Conversation {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    is_member: bool,
}

#[derive(Debug, Deserialize)]
struct ConversationsPage {
    #[serde(default)]
    channels: Vec<Conversation>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    user: SlackUser,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    profile: Option<SlackProfile>,
}

#[derive(Debug, Deserialize)]
struct SlackProfile {
    #[serde(default)]
    real_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectionsOpen {
    url: String,
}

// ============================================================================
// Client
// ============================================================================

/// Which token a call authenticates with.
#[derive(Debug, Clone, Copy)]
enum Token {
    Bot,
    App,
}

/// Slack Web API client.
#[derive(Debug, Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    config: SlackConfig,
}

impl SlackClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// `BusError::Transport` if the HTTP client cannot be built (TLS backend
    /// initialisation).
    pub fn new(config: SlackConfig) -> BusResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(BusError::transport)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &SlackConfig {
        &self.config
    }

    /// Calls `method` and returns the decoded body of a successful reply.
    async fn call(&self, method: &str, token: Token, params: &[(&str, &str)]) -> BusResult<Value> {
        let url = format!("{}/{}", self.config.api_base_url.trim_end_matches('/'), method);
        let token = match token {
            Token::Bot => &self.config.bot_token,
            Token::App => &self.config.app_token,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .form(params)
            .send()
            .await
            .map_err(BusError::transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(BusError::Transport(format!("{method} returned HTTP {status}")));
        }

        let body: Value = response.json().await.map_err(|e| BusError::Decode(e.to_string()))?;
        check_ok(method, body)
    }

    /// Returns the bot's own user id (`auth.test`).
    pub async fn auth_test(&self) -> BusResult<UserId> {
        let body = self.call("auth.test", Token::Bot, &[]).await?;
        let auth: AuthTest = decode("auth.test", body)?;
        debug!(
            user_id = %auth.user_id,
            user = auth.user.as_deref().unwrap_or(""),
            team = auth.team.as_deref().unwrap_or(""),
            "Slack auth.test succeeded"
        );
        Ok(UserId::new(auth.user_id))
    }

    /// Lists public and private channels visible to the bot, following
    /// pagination cursors.
    pub async fn conversations_list(&self) -> BusResult<Vec<ChannelInfo>> {
        let mut channels = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut params = vec![
                ("types", "public_channel,private_channel"),
                ("limit", CONVERSATIONS_PAGE_LIMIT),
                ("exclude_archived", "true"),
            ];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.as_str()));
            }

            let body = self.call("conversations.list", Token::Bot, &params).await?;
            let page: ConversationsPage = decode("conversations.list", body)?;
            channels.extend(page.channels.into_iter().map(|c| ChannelInfo {
                id: ChannelId::new(c.id),
                name: c.name,
                is_private: c.is_private,
                is_member: c.is_member,
            }));

            cursor = page
                .response_metadata
                .map(|m| m.next_cursor)
                .unwrap_or_default();
            if cursor.is_empty() {
                break;
            }
        }

        Ok(channels)
    }

    /// Joins `channel`. Already being a member is not an error.
    pub async fn conversations_join(&self, channel: &ChannelId) -> BusResult<()> {
        match self
            .call("conversations.join", Token::Bot, &[("channel", channel.as_str())])
            .await
        {
            Ok(body) => {
                if let Some(warning) = body.get("warning").and_then(Value::as_str) {
                    debug!(channel = %channel, warning, "conversations.join warning");
                }
                Ok(())
            }
            Err(BusError::Api { code, .. }) if code == "already_in_channel" => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Real name of `user` (`users.info`). Empty if Slack has none.
    pub async fn users_info(&self, user: &UserId) -> BusResult<String> {
        let body = self
            .call("users.info", Token::Bot, &[("user", user.as_str())])
            .await?;
        let info: UserInfo = decode("users.info", body)?;
        let name = info
            .user
            .real_name
            .filter(|n| !n.is_empty())
            .or_else(|| info.user.profile.and_then(|p| p.real_name))
            .unwrap_or_default();
        Ok(name)
    }

    /// Posts plain text to `channel` as the bot.
    pub async fn chat_post_message(&self, channel: &ChannelId, text: &str) -> BusResult<()> {
        self.call(
            "chat.postMessage",
            Token::Bot,
            &[("channel", channel.as_str()), ("text", text)],
        )
        .await
        .map(|_| ())
    }

    /// Requests a fresh Socket Mode WebSocket URL (`apps.connections.open`).
    pub async fn apps_connections_open(&self) -> BusResult<String> {
        let body = self.call("apps.connections.open", Token::App, &[]).await?;
        let open: ConnectionsOpen = decode("apps.connections.open", body)?;
        Ok(open.url)
    }
}

// ============================================================================
// Reply handling
// ============================================================================

/// Maps a Slack reply onto `Ok(body)` or a [`BusError`].
fn check_ok(method: &str, body: Value) -> BusResult<Value> {
    if body.get("ok").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(body);
    }

    let code = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error")
        .to_string();
    warn!(method, code = %code, "Slack API call failed");
    Err(classify_error(method, code))
}

/// Auth failures are fatal; everything else is an ordinary API error.
fn classify_error(method: &str, code: String) -> BusError {
    if AUTH_ERROR_CODES.contains(&code.as_str()) {
        BusError::Auth(code)
    } else {
        BusError::Api {
            method: method.to_string(),
            code,
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(method: &str, body: Value) -> BusResult<T> {
    serde_json::from_value(body).map_err(|e| BusError::Decode(format!("{method}: {e}")))
}

// ============================================================================
// Tests
// ============================================================================
