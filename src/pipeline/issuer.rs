use crate::bus::{PublishError, Publisher, Transport};
use crate::event::{ControlAction, ControlCommand};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

/// Reasons a control command was not issued
#[derive(Debug, Clone, PartialEq)]
pub enum IssueError {
    Unauthorized(String),
    UnknownAction(String),
    MissingTarget,
    Publish(PublishError),
}

impl fmt::Display for IssueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueError::Unauthorized(actor) => write!(f, "actor '{}' is not allowed to issue commands", actor),
            IssueError::UnknownAction(action) => {
                write!(f, "unknown action '{}': expected lock or unlock", action)
            }
            IssueError::MissingTarget => write!(f, "target is required"),
            IssueError::Publish(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for IssueError {}

impl From<PublishError> for IssueError {
    fn from(e: PublishError) -> Self {
        IssueError::Publish(e)
    }
}

/// Publishes operator-issued lock/unlock commands.
pub struct ControlIssuer<T> {
    publisher: Publisher<T>,
    topic: String,
    allowed_actors: Vec<String>,
}

impl<T: Transport> ControlIssuer<T> {
    /// An empty allowlist lets every actor through.
    pub fn new(publisher: Publisher<T>, topic: impl Into<String>, allowed_actors: Vec<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            allowed_actors,
        }
    }

    /// Whether `actor` may issue commands.
    pub fn is_allowed(&self, actor: &str) -> bool {
        self.allowed_actors.is_empty() || self.allowed_actors.iter().any(|a| a == actor)
    }

    /// Validate and publish one command, keyed by its target.
    pub async fn issue(&self, action: &str, target: &str, actor: &str) -> Result<ControlCommand, IssueError> {
        if !self.is_allowed(actor) {
            warn!(actor = %actor, "Rejected control command from unlisted actor");
            return Err(IssueError::Unauthorized(actor.to_string()));
        }

        let action = ControlAction::parse(action);
        if !action.is_known() {
            return Err(IssueError::UnknownAction(action.to_string()));
        }

        let target = target.trim();
        if target.is_empty() {
            return Err(IssueError::MissingTarget);
        }

        let command = ControlCommand::new(action, target, actor);
        self.publisher.publish(&self.topic, target, &command).await?;

        info!(
            action = %command.action,
            target = %target,
            by = %actor,
            "Control command issued"
        );
        Ok(command)
    }

    /// Bounded drain before exit.
    pub async fn flush(&self, timeout: Duration) -> bool {
        self.publisher.flush(timeout).await
    }
}
