use super::{AppConfig, ConfigError};
use std::str::FromStr;

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl AppConfig {
    /// Overlay environment variables on top of file/default values.
    ///
    /// Unparsable numbers are errors rather than silently ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BUS_URL") {
            self.bus.url = v;
        }
        if let Some(v) = lookup("TOPIC_MEDIA") {
            self.topics.presence = v;
        }
        if let Some(v) = lookup("TOPIC_CONTROL") {
            self.topics.control = v;
        }
        if let Some(v) = lookup("MACHINE_KEY") {
            self.host.identity = Some(v);
        }
        if self.host.identity.is_none() {
            self.host.identity = lookup("HOSTNAME").or_else(|| lookup("COMPUTERNAME"));
        }
        if let Some(v) = lookup("STATE_READER_CMD") {
            self.host.state_reader_command = Some(v);
        }
        if let Some(v) = lookup("LOCK_CMD") {
            self.host.lock_command = v;
        }
        if let Some(v) = lookup("WAKE_CMD") {
            self.host.wake_command = v;
        }
        if let Some(v) = lookup("POLL_INTERVAL_SEC") {
            self.agent.poll_interval_seconds = parse("POLL_INTERVAL_SEC", &v)?;
        }
        if let Some(v) = lookup("MACHINE_TARGET") {
            self.control.default_target = v;
        }
        if let Some(v) = lookup("CONTROL_TARGET") {
            self.control.default_target = v;
        }
        if let Some(v) = lookup("ALLOWED_ACTORS") {
            self.control.allowed_actors = v
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("GROUP_ID") {
            self.consumer.notifier_group = v;
        }
        if let Some(v) = lookup("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(v);
        }
        if let Some(v) = lookup("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = Some(v);
        }
        if let Some(v) = lookup("BOT_PREFIX") {
            self.telegram.prefix = v;
        }
        if let Some(v) = lookup("BOT_TITLE") {
            self.telegram.bot_title = v;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env(|key| match key {
                "BUS_URL" => Some("nats://10.0.0.1:4222".to_string()),
                "MACHINE_KEY" => Some("desk-01".to_string()),
                "POLL_INTERVAL_SEC" => Some(" 7 ".to_string()),
                "ALLOWED_ACTORS" => Some("telegram:1, ,telegram:2".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.bus.url, "nats://10.0.0.1:4222");
        assert_eq!(config.host.identity.as_deref(), Some("desk-01"));
        assert_eq!(config.agent.poll_interval_seconds, 7);
        assert_eq!(
            config.control.allowed_actors,
            vec!["telegram:1".to_string(), "telegram:2".to_string()]
        );
    }

    #[test]
    fn test_bot_settings() {
        let mut config = AppConfig::default();
        config
            .apply_env(|key| match key {
                "MACHINE_TARGET" => Some("desk-01".to_string()),
                "BOT_TITLE" => Some("[Office]".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.control.default_target, "desk-01");
        assert_eq!(config.telegram.bot_title, "[Office]");
        assert_eq!(config.telegram.long_poll_seconds, 25);
    }

    #[test]
    fn test_hostname_fallback() {
        let mut config = AppConfig::default();
        config
            .apply_env(|key| match key {
                "COMPUTERNAME" => Some("WIN-PC".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.host.identity.as_deref(), Some("WIN-PC"));
    }

    #[test]
    fn test_machine_key_beats_hostname() {
        let mut config = AppConfig::default();
        config
            .apply_env(|key| match key {
                "MACHINE_KEY" => Some("desk-01".to_string()),
                "HOSTNAME" => Some("box".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.host.identity.as_deref(), Some("desk-01"));
    }

    #[test]
    fn test_bad_number_is_an_error() {
        let mut config = AppConfig::default();
        let result = config.apply_env(|key| match key {
            "POLL_INTERVAL_SEC" => Some("soon".to_string()),
            _ => None,
        });
        assert_eq!(
            result,
            Err(ConfigError::InvalidValue {
                key: "POLL_INTERVAL_SEC".to_string(),
                value: "soon".to_string(),
            })
        );
    }
}
