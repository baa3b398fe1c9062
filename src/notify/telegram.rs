use super::format::{outcome_html, presence_html};
use super::Notifier;
use crate::control::ActionOutcome;
use crate::event::PresenceSnapshot;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Telegram bot settings
#[derive(Clone, Debug, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Bold tag at the start of every notification
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Bold tag at the start of every control bot reply
    #[serde(default = "default_bot_title")]
    pub bot_title: String,
    /// Server-side wait of one `getUpdates` long poll
    #[serde(default = "default_long_poll_seconds")]
    pub long_poll_seconds: u64,
}

fn default_prefix() -> String {
    "[NowPlaying]".to_string()
}

fn default_bot_title() -> String {
    "[AdminPC]".to_string()
}

fn default_long_poll_seconds() -> u64 {
    25
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            prefix: default_prefix(),
            bot_title: default_bot_title(),
            long_poll_seconds: default_long_poll_seconds(),
        }
    }
}

impl TelegramConfig {
    /// Bot token, when set and not blank.
    pub fn token(&self) -> Option<&str> {
        self.bot_token.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// Token and chat id, when both are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let chat = self.chat_id.as_deref().filter(|c| !c.trim().is_empty())?;
        Some((self.token()?, chat))
    }
}

/// Bot API response wrapper: `{"ok": bool, "result": ..., "description": ...}`
#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
}

/// Minimal Bot API client shared by the notifier and the control bot.
#[derive(Clone)]
pub struct TelegramApi {
    http_client: reqwest::Client,
    base: String,
}

impl TelegramApi {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build Telegram HTTP client")?;

        Ok(Self {
            http_client,
            base: format!("{}/bot{}", base_url.trim_end_matches('/'), token),
        })
    }

    pub fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base, method)
    }

    /// Call `method` with a JSON body and decode its `result`.
    pub async fn call<B, R>(&self, method: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        self.call_with_timeout(method, body, REQUEST_TIMEOUT).await
    }

    /// Same as `call` with a per-request timeout (long polls outlive the default).
    pub async fn call_with_timeout<B, R>(&self, method: &str, body: &B, timeout: Duration) -> Result<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let response = self
            .http_client
            .post(self.method_url(method))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .context(format!("Telegram {} request failed", method))?;

        let status = response.status();
        let reply: ApiResponse = response
            .json()
            .await
            .context(format!("Telegram {} returned an unreadable body (status {})", method, status))?;

        if !status.is_success() || !reply.ok {
            bail!(
                "Telegram {} failed with status {}: {}",
                method,
                status,
                reply.description.unwrap_or_default()
            );
        }

        debug!(method = %method, "Telegram call succeeded");
        serde_json::from_value(reply.result.unwrap_or(Value::Null))
            .context(format!("Unexpected Telegram {} result", method))
    }
}

/// Sends HTML notifications through the Bot API `sendMessage` endpoint.
pub struct TelegramNotifier {
    api: TelegramApi,
    chat_id: String,
    prefix: String,
}

impl TelegramNotifier {
    /// `Ok(None)` unless both token and chat id are configured.
    pub fn from_config(config: &TelegramConfig) -> Result<Option<Self>> {
        match config.credentials() {
            Some((token, chat_id)) => Ok(Some(Self::with_base_url(
                DEFAULT_API_URL,
                token,
                chat_id,
                &config.prefix,
            )?)),
            None => Ok(None),
        }
    }

    pub fn with_base_url(base_url: &str, token: &str, chat_id: &str, prefix: &str) -> Result<Self> {
        Ok(Self {
            api: TelegramApi::new(base_url, token)?,
            chat_id: chat_id.to_string(),
            prefix: prefix.to_string(),
        })
    }

    async fn send_html(&self, html: &str) -> Result<()> {
        let body = json!({
            "chat_id": self.chat_id,
            "text": html,
            "parse_mode": "HTML",
        });
        let _: Value = self.api.call("sendMessage", &body).await?;
        debug!(chat_id = %self.chat_id, "Telegram message sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, host: Option<&str>, snapshot: &PresenceSnapshot) -> Result<()> {
        self.send_html(&presence_html(&self.prefix, host, snapshot)).await
    }

    async fn notify_action(&self, outcome: &ActionOutcome) -> Result<()> {
        self.send_html(&outcome_html(&self.prefix, outcome)).await
    }
}
