//! Operator control bot.
//!
//! Answers `/start` with an inline Lock/Unlock keyboard and turns button
//! presses into control commands published through `ControlIssuer`. The
//! actor of every command is `telegram:<user id>`, so the issuer's allowlist
//! applies to chat users directly.

use crate::bus::Transport;
use crate::event::ControlCommand;
use crate::notify::format::{escape_html, local_time};
use crate::notify::TelegramApi;
use crate::pipeline::ControlIssuer;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

const NOT_AUTHORIZED: &str = "⛔ Not authorized.";
const UNKNOWN_ACTION: &str = "Unknown action.";
const NOOP: &str = "noop";

/// Incoming update from `getUpdates`. Fields the bot does not use are ignored.
#[derive(Clone, Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct User {
    pub id: i64,
}

/// A button press on an inline keyboard.
#[derive(Clone, Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    /// The message carrying the keyboard
    pub message: Option<Message>,
    pub data: Option<String>,
}

/// Bot API calls the control bot needs.
#[async_trait]
pub trait BotApi: Send + Sync {
    /// Long poll for updates with id >= `offset`.
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>>;

    async fn send_message(&self, chat_id: i64, html: &str, keyboard: Option<&Value>) -> Result<()>;

    /// Stop the client-side spinner on a pressed button.
    async fn answer_callback_query(&self, callback_id: &str) -> Result<()>;

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        html: &str,
        keyboard: Option<&Value>,
    ) -> Result<()>;
}

#[async_trait]
impl BotApi for TelegramApi {
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        self.call_with_timeout("getUpdates", &body, Duration::from_secs(timeout_secs + 10))
            .await
    }

    async fn send_message(&self, chat_id: i64, html: &str, keyboard: Option<&Value>) -> Result<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": html,
            "parse_mode": "HTML",
        });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = keyboard.clone();
        }
        let _: Value = self.call("sendMessage", &body).await?;
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str) -> Result<()> {
        let _: Value = self
            .call("answerCallbackQuery", &json!({ "callback_query_id": callback_id }))
            .await?;
        Ok(())
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        html: &str,
        keyboard: Option<&Value>,
    ) -> Result<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": html,
            "parse_mode": "HTML",
        });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = keyboard.clone();
        }
        let _: Value = self.call("editMessageText", &body).await?;
        Ok(())
    }
}

/// Inline keyboard: Lock / Unlock, plus an inert row naming the target.
pub fn keyboard(target: &str) -> Value {
    json!({
        "inline_keyboard": [
            [
                { "text": "🔒 Lock", "callback_data": "lock" },
                { "text": "🔓 Unlock", "callback_data": "unlock" },
            ],
            [
                { "text": format!("🎯 Target: {}", target), "callback_data": NOOP },
            ],
        ]
    })
}

fn actor_for(user: &User) -> String {
    format!("telegram:{}", user.id)
}

/// Long-polling control bot driving a `ControlIssuer`.
pub struct ControlBot<A, T> {
    api: A,
    issuer: ControlIssuer<T>,
    title: String,
    target: String,
    long_poll: Duration,
    retry_delay: Duration,
    flush_timeout: Duration,
}

impl<A: BotApi, T: Transport> ControlBot<A, T> {
    /// `target` is the host (or "all") every button press addresses.
    pub fn new(
        api: A,
        issuer: ControlIssuer<T>,
        title: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            api,
            issuer,
            title: title.into(),
            target: target.into(),
            long_poll: Duration::from_secs(25),
            retry_delay: Duration::from_secs(1),
            flush_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_long_poll(mut self, long_poll: Duration) -> Self {
        self.long_poll = long_poll;
        self
    }

    /// Pause after a failed `getUpdates`.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_flush_timeout(mut self, flush_timeout: Duration) -> Self {
        self.flush_timeout = flush_timeout;
        self
    }

    /// Handle one update. Returns the command when one was published.
    pub async fn handle(&self, update: Update) -> Result<Option<ControlCommand>> {
        if let Some(query) = update.callback_query {
            return self.on_press(query).await;
        }

        if let Some(message) = update.message {
            let is_start = message
                .text
                .as_deref()
                .and_then(|text| text.split_whitespace().next())
                .map_or(false, |cmd| cmd == "/start" || cmd.starts_with("/start@"));
            if is_start {
                self.on_start(message).await?;
                return Ok(None);
            }
        }

        debug!(update_id = update.update_id, "Update ignored");
        Ok(None)
    }

    async fn on_start(&self, message: Message) -> Result<()> {
        let allowed = message
            .from
            .as_ref()
            .map_or(false, |user| self.issuer.is_allowed(&actor_for(user)));

        if !allowed {
            warn!(chat_id = message.chat.id, "Rejected /start from unlisted user");
            return self.api.send_message(message.chat.id, NOT_AUTHORIZED, None).await;
        }

        let text = format!(
            "<b>{}</b>\nHost control\nChoose an action:",
            escape_html(&self.title)
        );
        self.api
            .send_message(message.chat.id, &text, Some(&keyboard(&self.target)))
            .await
    }

    async fn on_press(&self, query: CallbackQuery) -> Result<Option<ControlCommand>> {
        if let Err(e) = self.api.answer_callback_query(&query.id).await {
            warn!(error = %e, "Failed to answer callback query");
        }

        let actor = actor_for(&query.from);
        if !self.issuer.is_allowed(&actor) {
            warn!(actor = %actor, "Rejected button press from unlisted user");
            self.edit(&query, NOT_AUTHORIZED, false).await?;
            return Ok(None);
        }

        let action = query.data.as_deref().unwrap_or_default();
        match action {
            NOOP => Ok(None),
            "lock" | "unlock" => match self.issuer.issue(action, &self.target, &actor).await {
                Ok(command) => {
                    let text = self.status_text(if action == "lock" {
                        "🔒 Lock sent"
                    } else {
                        "🔓 Unlock sent"
                    });
                    self.edit(&query, &text, true).await?;
                    Ok(Some(command))
                }
                Err(e) => {
                    warn!(actor = %actor, action = %action, error = %e, "Failed to issue command from bot");
                    let text = self.status_text(&format!("⚠️ Not sent: {}", escape_html(&e.to_string())));
                    self.edit(&query, &text, true).await?;
                    Ok(None)
                }
            },
            other => {
                warn!(data = %other, "Unknown button data");
                self.edit(&query, UNKNOWN_ACTION, false).await?;
                Ok(None)
            }
        }
    }

    fn status_text(&self, status: &str) -> String {
        format!(
            "<b>{}</b>\n{}\n🎯 Target: <code>{}</code>\n🕑 {}",
            escape_html(&self.title),
            status,
            escape_html(&self.target),
            local_time(&Utc::now())
        )
    }

    /// Rewrite the message that carried the pressed keyboard, if it is known.
    async fn edit(&self, query: &CallbackQuery, html: &str, with_keyboard: bool) -> Result<()> {
        let message = match &query.message {
            Some(message) => message,
            None => return Ok(()),
        };
        let keyboard = with_keyboard.then(|| keyboard(&self.target));
        self.api
            .edit_message_text(message.chat.id, message.message_id, html, keyboard.as_ref())
            .await
    }

    /// Poll for updates until `stop` flips, then flush. Returns commands issued.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> usize {
        info!(target_host = %self.target, "Starting control bot");

        let mut offset = 0;
        let mut issued = 0;

        while !*stop.borrow() {
            let fetched = tokio::select! {
                fetched = self.api.get_updates(offset, self.long_poll.as_secs()) => fetched,
                _ = stop.changed() => break,
            };

            let updates = match fetched {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "Failed to fetch bot updates");
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_delay) => {}
                        _ = stop.changed() => break,
                    }
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                match self.handle(update).await {
                    Ok(Some(_)) => issued += 1,
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Failed to answer bot update"),
                }
            }
        }

        info!(issued = issued, "Control bot stopping");
        self.issuer.flush(self.flush_timeout).await;
        issued
    }
}
