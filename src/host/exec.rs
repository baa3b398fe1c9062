use super::{SessionController, StateReader};
use crate::event::PresenceSnapshot;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Split a configured command line into program and arguments.
fn split_command(line: &str) -> Option<(String, Vec<String>)> {
    let mut parts = line.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}

async fn run_for_output(program: &str, args: &[String], timeout: Duration) -> Result<Vec<u8>> {
    let output = tokio::time::timeout(
        timeout,
        Command::new(program).args(args).kill_on_drop(true).output(),
    )
    .await
    .context(format!("'{}' timed out after {:?}", program, timeout))?
    .context(format!("Failed to run '{}'", program))?;

    if !output.status.success() {
        bail!(
            "'{}' exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(output.stdout)
}

/// `StateReader` backed by a helper program printing one JSON object.
///
/// Empty output (or `null`) means no active session. A missing `timestamp`
/// is filled in with the read time.
pub struct CommandStateReader {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandStateReader {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Parse a whitespace-separated command line. `None` if blank.
    pub fn from_command_line(line: &str) -> Option<Self> {
        split_command(line).map(|(program, args)| Self::new(program, args))
    }

    /// Decode helper output into a snapshot.
    pub fn parse_output(stdout: &[u8]) -> Result<Option<PresenceSnapshot>> {
        let text = String::from_utf8_lossy(stdout);
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let mut value: Value = serde_json::from_str(text).context("Reader output is not JSON")?;
        if value.is_null() {
            return Ok(None);
        }
        let object = value
            .as_object_mut()
            .context("Reader output must be a JSON object")?;

        // Helpers report missing metadata as null; absent is what we want
        object.retain(|_, v| !v.is_null());
        object
            .entry("timestamp")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));

        let snapshot: PresenceSnapshot =
            serde_json::from_value(value).context("Reader output is not a presence snapshot")?;
        Ok(Some(snapshot.without_blanks()))
    }
}

#[async_trait]
impl StateReader for CommandStateReader {
    async fn read(&self) -> Result<Option<PresenceSnapshot>> {
        let stdout = run_for_output(&self.program, &self.args, self.timeout).await?;
        Self::parse_output(&stdout)
    }
}

/// `SessionController` that runs one program to lock and another to wake.
pub struct CommandSessionController {
    lock: Option<(String, Vec<String>)>,
    wake: Option<(String, Vec<String>)>,
    timeout: Duration,
}

impl CommandSessionController {
    /// Blank command lines disable the corresponding action.
    pub fn new(lock_command: &str, wake_command: &str) -> Self {
        Self {
            lock: split_command(lock_command),
            wake: split_command(wake_command),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    async fn run(&self, what: &str, command: &Option<(String, Vec<String>)>) -> bool {
        let (program, args) = match command {
            Some(command) => command,
            None => {
                warn!(action = %what, "No command configured, skipping");
                return false;
            }
        };

        match run_for_output(program, args, self.timeout).await {
            Ok(_) => {
                debug!(action = %what, program = %program, "Session command succeeded");
                true
            }
            Err(e) => {
                warn!(action = %what, error = %e, "Session command failed");
                false
            }
        }
    }
}

#[async_trait]
impl SessionController for CommandSessionController {
    async fn lock(&self) -> bool {
        let ok = self.run("lock", &self.lock).await;
        if ok {
            info!("Session locked");
        }
        ok
    }

    async fn wake(&self) {
        if self.run("wake", &self.wake).await {
            info!("Display woken (session unlock still requires local login)");
        }
    }
}
