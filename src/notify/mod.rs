//! Operator notifications.

use crate::control::ActionOutcome;
use crate::event::PresenceSnapshot;
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

pub mod format;
pub mod telegram;

pub use telegram::{TelegramApi, TelegramConfig, TelegramNotifier};

/// Tells a human what happened.
///
/// Failures are returned so callers can log them; they never stop a loop.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// A host's playback changed.
    async fn notify(&self, host: Option<&str>, snapshot: &PresenceSnapshot) -> Result<()>;

    /// A control command was executed on a host.
    async fn notify_action(&self, outcome: &ActionOutcome) -> Result<()>;
}

#[async_trait]
impl<N: Notifier + ?Sized> Notifier for Box<N> {
    async fn notify(&self, host: Option<&str>, snapshot: &PresenceSnapshot) -> Result<()> {
        (**self).notify(host, snapshot).await
    }

    async fn notify_action(&self, outcome: &ActionOutcome) -> Result<()> {
        (**self).notify_action(outcome).await
    }
}

/// Notifier that only writes to the log. Used when no chat is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, host: Option<&str>, snapshot: &PresenceSnapshot) -> Result<()> {
        info!(
            host = ?host,
            title = ?snapshot.title,
            artist = ?snapshot.artist,
            status = ?snapshot.playback_status,
            "Now playing"
        );
        Ok(())
    }

    async fn notify_action(&self, outcome: &ActionOutcome) -> Result<()> {
        info!(by = ?outcome.issued_by, "{}", outcome.summary());
        Ok(())
    }
}
