mod env;

use serde::Deserialize;
use std::fmt;

use crate::control::HostIdentity;

// Re-export section types owned by other modules
pub use crate::bus::BusConfig;
pub use crate::notify::TelegramConfig;

/// Complete hostwatch configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Logical topic names
#[derive(Debug, Clone, Deserialize)]
pub struct TopicsConfig {
    #[serde(default = "default_presence_topic")]
    pub presence: String,
    #[serde(default = "default_control_topic")]
    pub control: String,
}

fn default_presence_topic() -> String {
    "pc.activity.media".to_string()
}

fn default_control_topic() -> String {
    "pc.activity.control".to_string()
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            presence: default_presence_topic(),
            control: default_control_topic(),
        }
    }
}

/// Local host settings
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    /// Machine identifier; falls back to HOSTNAME / COMPUTERNAME
    #[serde(default)]
    pub identity: Option<String>,
    /// Helper printing the current media session as JSON
    #[serde(default)]
    pub state_reader_command: Option<String>,
    #[serde(default = "default_lock_command")]
    pub lock_command: String,
    #[serde(default = "default_wake_command")]
    pub wake_command: String,
}

fn default_lock_command() -> String {
    "loginctl lock-session".to_string()
}

fn default_wake_command() -> String {
    "xset dpms force on".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            identity: None,
            state_reader_command: None,
            lock_command: default_lock_command(),
            wake_command: default_wake_command(),
        }
    }
}

/// Presence agent (poll loop) settings
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Upper bound on the shutdown flush
    #[serde(default = "default_flush_timeout")]
    pub flush_timeout_seconds: u64,
    /// Publish attempts before giving up on one message
    #[serde(default = "default_publish_attempts")]
    pub publish_attempts: u32,
}

fn default_poll_interval() -> u64 {
    2
}

fn default_flush_timeout() -> u64 {
    5
}

fn default_publish_attempts() -> u32 {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            flush_timeout_seconds: default_flush_timeout(),
            publish_attempts: default_publish_attempts(),
        }
    }
}

/// Subscriber settings
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Durable consumer name for the presence notifier
    #[serde(default = "default_notifier_group")]
    pub notifier_group: String,
    /// Durable consumer name prefix for control receivers (host id is appended)
    #[serde(default = "default_control_group")]
    pub control_group: String,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

fn default_notifier_group() -> String {
    "pc-media-notifier".to_string()
}

fn default_control_group() -> String {
    "pc-lock-consumer".to_string()
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            notifier_group: default_notifier_group(),
            control_group: default_control_group(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

/// Control issuing settings
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Target used when the operator does not name one
    #[serde(default = "default_target")]
    pub default_target: String,
    /// Actors allowed to issue commands; empty allows everyone
    #[serde(default)]
    pub allowed_actors: Vec<String>,
}

fn default_target() -> String {
    crate::event::TARGET_ALL.to_string()
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            default_target: default_target(),
            allowed_actors: Vec::new(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            topics: TopicsConfig::default(),
            host: HostConfig::default(),
            agent: AgentConfig::default(),
            consumer: ConsumerConfig::default(),
            control: ControlConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

/// Startup configuration errors. Always fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Read(String),
    Parse(String),
    MissingIdentity,
    EmptyValue(&'static str),
    InvalidValue { key: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(msg) => write!(f, "failed to read config file: {}", msg),
            ConfigError::Parse(msg) => write!(f, "failed to parse config file: {}", msg),
            ConfigError::MissingIdentity => {
                write!(f, "host identity is required (set MACHINE_KEY or host.identity)")
            }
            ConfigError::EmptyValue(field) => write!(f, "{} must not be empty", field),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value '{}' for {}", value, key)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
}

impl AppConfig {
    /// File named by `HOSTWATCH_CONFIG` (if any), then process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_sources(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable variable lookup.
    pub fn from_sources<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("HOSTWATCH_CONFIG") {
            Some(path) if !path.trim().is_empty() => load_config(path.trim())?,
            _ => AppConfig::default(),
        };
        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that hold for every role.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("bus.url"));
        }
        if self.topics.presence.trim().is_empty() {
            return Err(ConfigError::EmptyValue("topics.presence"));
        }
        if self.topics.control.trim().is_empty() {
            return Err(ConfigError::EmptyValue("topics.control"));
        }
        if self.agent.poll_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "agent.poll_interval_seconds".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Identity for roles that act on or report about this host.
    pub fn host_identity(&self) -> Result<HostIdentity, ConfigError> {
        self.host
            .identity
            .as_deref()
            .and_then(HostIdentity::new)
            .ok_or(ConfigError::MissingIdentity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.bus.url, "nats://localhost:4222");
        assert_eq!(config.topics.presence, "pc.activity.media");
        assert_eq!(config.topics.control, "pc.activity.control");
        assert_eq!(config.agent.poll_interval_seconds, 2);
        assert_eq!(config.control.default_target, "all");
        assert!(config.host.identity.is_none());
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [bus]
            url = "nats://bus.example.com:4222"
            num_replicas = 3

            [topics]
            presence = "home.media"
            control = "home.control"

            [host]
            identity = "desk-01"
            state_reader_command = "media-helper --json"

            [agent]
            poll_interval_seconds = 5

            [control]
            allowed_actors = ["telegram:1", "telegram:2"]

            [telegram]
            bot_token = "123:abc"
            chat_id = "-100"
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.bus.url, "nats://bus.example.com:4222");
        assert_eq!(config.bus.num_replicas, 3);
        assert_eq!(config.topics.presence, "home.media");
        assert_eq!(config.host_identity().unwrap().as_str(), "desk-01");
        assert_eq!(config.agent.poll_interval_seconds, 5);
        assert_eq!(config.control.allowed_actors.len(), 2);
        assert_eq!(config.telegram.prefix, "[NowPlaying]");
    }

    #[test]
    fn test_partial_config() {
        // Missing sections use defaults
        let toml = r#"
            [agent]
            poll_interval_seconds = 3
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.agent.poll_interval_seconds, 3);
        assert_eq!(config.agent.flush_timeout_seconds, 5);
        assert_eq!(config.consumer.poll_timeout_ms, 1000);
    }

    #[test]
    fn test_missing_identity_is_an_error() {
        let config = AppConfig::from_sources(lookup(&[])).unwrap();
        assert_eq!(config.host_identity(), Err(ConfigError::MissingIdentity));
    }

    #[test]
    fn test_blank_identity_is_an_error() {
        let config = AppConfig::from_sources(lookup(&[("MACHINE_KEY", "  ")])).unwrap();
        assert_eq!(config.host_identity(), Err(ConfigError::MissingIdentity));
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let result = AppConfig::from_sources(lookup(&[("POLL_INTERVAL_SEC", "0")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_empty_topic_is_rejected() {
        let result = AppConfig::from_sources(lookup(&[("TOPIC_CONTROL", " ")]));
        assert_eq!(result.unwrap_err(), ConfigError::EmptyValue("topics.control"));
    }

    #[test]
    fn test_file_then_env_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[host]\nidentity = \"from-file\"\n[topics]\npresence = \"file.media\""
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = AppConfig::from_sources(lookup(&[
            ("HOSTWATCH_CONFIG", path.as_str()),
            ("MACHINE_KEY", "from-env"),
        ]))
        .unwrap();

        assert_eq!(config.host_identity().unwrap().as_str(), "from-env");
        assert_eq!(config.topics.presence, "file.media");
    }

    #[test]
    fn test_unreadable_config_file() {
        let result = AppConfig::from_sources(lookup(&[("HOSTWATCH_CONFIG", "/nonexistent/hostwatch.toml")]));
        assert!(matches!(result, Err(ConfigError::Read(_))));
    }
}
