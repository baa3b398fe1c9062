//! Host-side collaborators: reading media state and controlling the session.
//!
//! The OS specifics live behind these traits. The bundled implementations
//! shell out to configurable helper programs.

use crate::event::PresenceSnapshot;
use anyhow::Result;
use async_trait::async_trait;

mod exec;

pub use exec::{CommandSessionController, CommandStateReader};

/// Reads what is currently playing on this host.
#[async_trait]
pub trait StateReader: Send + Sync {
    /// `Ok(None)` means no active media session.
    ///
    /// Errors are transient; the poll loop logs them and tries again on the
    /// next tick.
    async fn read(&self) -> Result<Option<PresenceSnapshot>>;
}

/// Locks or wakes the local interactive session.
///
/// Both calls are best-effort and log their own failures.
#[async_trait]
pub trait SessionController: Send + Sync {
    /// Returns whether the lock request succeeded.
    async fn lock(&self) -> bool;

    /// Wake the display. Cannot unlock a session that requires login.
    async fn wake(&self);
}
