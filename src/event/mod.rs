use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;


/// Discriminator carried by every control message.
pub const CONTROL_TYPE: &str = "control";

/// Wildcard target that addresses every host.
pub const TARGET_ALL: &str = "all";

/// Playback state reported by the host media session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Closed,
    Opened,
    Changing,
    Stopped,
    Playing,
    Paused,
}

impl PlaybackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackStatus::Closed => "closed",
            PlaybackStatus::Opened => "opened",
            PlaybackStatus::Changing => "changing",
            PlaybackStatus::Stopped => "stopped",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PresenceSnapshot is a point-in-time read of what is playing on one host.
///
/// Absent fields are omitted from the wire form, never written as `null`
/// or as empty strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    /// When the snapshot was read (ISO-8601 UTC on the wire)
    pub timestamp: DateTime<Utc>,

    /// Application that owns the media session (e.g. "Spotify.exe")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_app: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,

    /// Album title; excluded from change detection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_status: Option<PlaybackStatus>,
}

impl PresenceSnapshot {
    /// Snapshot stamped with the current time and no metadata.
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            source_app: None,
            title: None,
            artist: None,
            album: None,
            playback_status: None,
        }
    }

    /// Turns blank strings into absent fields.
    ///
    /// Readers sometimes report "" for missing metadata; an empty string must
    /// never reach the bus.
    pub fn without_blanks(mut self) -> Self {
        for field in [
            &mut self.source_app,
            &mut self.title,
            &mut self.artist,
            &mut self.album,
        ] {
            if field.as_deref().map_or(false, |v| v.trim().is_empty()) {
                *field = None;
            }
        }
        self
    }
}

/// Action requested by a control command.
///
/// Parsing is case-insensitive. Anything other than lock/unlock is kept
/// verbatim as `Unknown` so receivers can log what they ignored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ControlAction {
    Lock,
    Unlock,
    Unknown(String),
}

impl ControlAction {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "lock" => ControlAction::Lock,
            "unlock" => ControlAction::Unlock,
            _ => ControlAction::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ControlAction::Lock => "lock",
            ControlAction::Unlock => "unlock",
            ControlAction::Unknown(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ControlAction::Unknown(_))
    }
}

impl From<String> for ControlAction {
    fn from(raw: String) -> Self {
        ControlAction::parse(&raw)
    }
}

impl From<ControlAction> for String {
    fn from(action: ControlAction) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ControlCommand is an immutable lock/unlock request on the control topic.
///
/// Wire form:
/// `{"type":"control","action":"lock","target":"all","by":"chat:1","ts":"..."}`
///
/// `type` and `action` are required to decode. A missing `target` decodes
/// fine and simply matches no host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    #[serde(rename = "type")]
    pub kind: String,

    pub action: ControlAction,

    /// Host identifier or the wildcard "all"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Free-form actor id (e.g. "telegram:12345")
    #[serde(rename = "by", default, skip_serializing_if = "Option::is_none")]
    pub issued_by: Option<String>,

    #[serde(rename = "ts", default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
}

impl ControlCommand {
    /// Build a control command stamped with the current time.
    pub fn new(action: ControlAction, target: impl Into<String>, issued_by: impl Into<String>) -> Self {
        Self {
            kind: CONTROL_TYPE.to_string(),
            action,
            target: Some(target.into()),
            issued_by: Some(issued_by.into()),
            issued_at: Some(Utc::now()),
        }
    }

    /// True when the discriminator says this is a control message.
    pub fn is_control(&self) -> bool {
        self.kind.trim().eq_ignore_ascii_case(CONTROL_TYPE)
    }
}
