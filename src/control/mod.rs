//! Routing of control commands to the local host.
//!
//! Every host subscribes to the same control topic and evaluates every
//! command on its own. Whether a host acts is decided only by the command's
//! `target`, compared case-insensitively with the local identity.

use crate::event::{ControlAction, ControlCommand, TARGET_ALL};
use std::fmt;
use tracing::{debug, warn};


/// Locally configured machine identifier.
///
/// Read once at startup and never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostIdentity(String);

impl HostIdentity {
    /// Returns `None` for a blank identifier.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `target` addresses this host.
    pub fn is_targeted_by(&self, target: Option<&str>) -> bool {
        target_matches(target, self.as_str())
    }
}

impl fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Single target comparison shared by every consumer.
///
/// A missing or blank target matches nobody. "all" matches everybody.
/// Otherwise the trimmed target must equal `identity` under Unicode
/// lowercasing.
pub fn target_matches(target: Option<&str>, identity: &str) -> bool {
    let target = match target.map(str::trim) {
        Some(t) if !t.is_empty() => t.to_lowercase(),
        _ => return false,
    };
    target == TARGET_ALL || target == identity.trim().to_lowercase()
}

/// What the local session controller should do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Lock,
    /// Wake the display. This never unlocks an authenticated session.
    Wake,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Lock => write!(f, "lock"),
            Action::Wake => write!(f, "wake"),
        }
    }
}

/// Result of executing a routed command, reported to the operator.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionOutcome {
    pub host: String,
    pub action: Action,
    pub issued_by: Option<String>,
    pub succeeded: bool,
}

impl ActionOutcome {
    /// One-line operator summary.
    ///
    /// A wake always says the session was not unlocked.
    pub fn summary(&self) -> String {
        match (self.action, self.succeeded) {
            (Action::Lock, true) => format!("{}: session locked", self.host),
            (Action::Lock, false) => format!("{}: lock failed", self.host),
            (Action::Wake, true) => format!(
                "{}: display woken; session NOT unlocked (login required on the host)",
                self.host
            ),
            (Action::Wake, false) => format!("{}: wake failed", self.host),
        }
    }
}

/// Decide what, if anything, `command` asks this host to do.
///
/// Not deduplicated: the same lock delivered twice routes to `Lock` twice.
pub fn route(command: &ControlCommand, identity: &HostIdentity) -> Option<Action> {
    if !command.is_control() {
        warn!(kind = %command.kind, "Unrecognized message type, dropped");
        return None;
    }

    if !identity.is_targeted_by(command.target.as_deref()) {
        debug!(
            target = ?command.target,
            identity = %identity,
            "Command addressed to another host, ignored"
        );
        return None;
    }

    match &command.action {
        ControlAction::Lock => Some(Action::Lock),
        ControlAction::Unlock => Some(Action::Wake),
        ControlAction::Unknown(raw) => {
            warn!(action = %raw, by = ?command.issued_by, "Unknown control action, dropped");
            None
        }
    }
}
