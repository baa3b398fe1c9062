//! Change detection for presence snapshots.
//!
//! Hosts poll their media session every few seconds and mostly read the same
//! thing over and over. `ChangeFilter` turns that noisy stream into a stream
//! of genuine changes by comparing a signature that ignores the clock and the
//! album.

use crate::event::{PlaybackStatus, PresenceSnapshot};
use tracing::debug;


/// Fields that decide whether two snapshots describe the same event.
///
/// Comparison is exact and case-sensitive. `timestamp` and `album` are left
/// out so that a tick refreshing only those never counts as a change.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChangeSignature {
    pub source_app: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub playback_status: Option<PlaybackStatus>,
}

impl ChangeSignature {
    pub fn of(snapshot: &PresenceSnapshot) -> Self {
        Self {
            source_app: snapshot.source_app.clone(),
            title: snapshot.title.clone(),
            artist: snapshot.artist.clone(),
            playback_status: snapshot.playback_status,
        }
    }
}

/// Suppresses snapshots whose signature equals the last emitted one.
///
/// Owned by exactly one loop; never shared.
#[derive(Debug, Default)]
pub struct ChangeFilter {
    /// `None` until the first emission
    last_emitted: Option<ChangeSignature>,
}

impl ChangeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe one reader result.
    ///
    /// Returns the snapshot when it is a change worth publishing. An absent
    /// snapshot (no active session, or a failed read) is no signal at all:
    /// it neither emits nor touches the stored signature.
    pub fn observe(&mut self, snapshot: Option<PresenceSnapshot>) -> Option<PresenceSnapshot> {
        let snapshot = snapshot?;
        let signature = ChangeSignature::of(&snapshot);

        if self.last_emitted.as_ref() == Some(&signature) {
            debug!(title = ?snapshot.title, "Presence unchanged, suppressed");
            return None;
        }

        self.last_emitted = Some(signature);
        Some(snapshot)
    }

    /// Signature of the last emitted snapshot, if any.
    pub fn last_emitted(&self) -> Option<&ChangeSignature> {
        self.last_emitted.as_ref()
    }
}
