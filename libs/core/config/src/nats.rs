use crate::{env_flag, env_or_default, env_parse, ConfigError, FromEnv};
use std::time::Duration;

pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

/// NATS connection configuration
#[derive(Clone, Debug, PartialEq)]
pub struct NatsConfig {
    /// Server URLs, tried in order.
    pub servers: Vec<String>,
    pub connection_name: Option<String>,
    pub allow_reconnect: bool,
    pub max_reconnect_attempts: usize,
    pub reconnect_time_wait: Duration,
    pub connect_timeout: Option<Duration>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: vec![DEFAULT_NATS_URL.to_string()],
            connection_name: None,
            allow_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_time_wait: Duration::from_secs(1),
            connect_timeout: None,
        }
    }
}

impl FromEnv for NatsConfig {
    /// Reads `NATS_URL` (comma separated) and the optional reconnect settings.
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let servers: Vec<String> = env_or_default("NATS_URL", DEFAULT_NATS_URL)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        if servers.is_empty() {
            return Err(ConfigError::ParseError {
                key: "NATS_URL".to_string(),
                details: "no server URL given".to_string(),
            });
        }

        Ok(Self {
            servers,
            connection_name: env_parse("NATS_CONNECTION_NAME")?,
            allow_reconnect: env_flag("NATS_ALLOW_RECONNECT", defaults.allow_reconnect)?,
            max_reconnect_attempts: env_parse("NATS_MAX_RECONNECT_ATTEMPTS")?
                .unwrap_or(defaults.max_reconnect_attempts),
            reconnect_time_wait: env_parse("NATS_RECONNECT_TIME_WAIT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconnect_time_wait),
            connect_timeout: env_parse("NATS_CONNECT_TIMEOUT_SECS")?.map(Duration::from_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 6] = [
        "NATS_URL",
        "NATS_CONNECTION_NAME",
        "NATS_ALLOW_RECONNECT",
        "NATS_MAX_RECONNECT_ATTEMPTS",
        "NATS_RECONNECT_TIME_WAIT_SECS",
        "NATS_CONNECT_TIMEOUT_SECS",
    ];

    #[test]
    fn test_nats_config_defaults() {
        temp_env::with_vars_unset(VARS, || {
            let config = NatsConfig::from_env().unwrap();
            assert_eq!(config, NatsConfig::default());
            assert_eq!(config.servers, vec!["nats://localhost:4222"]);
            assert!(config.allow_reconnect);
            assert_eq!(config.max_reconnect_attempts, 5);
            assert_eq!(config.reconnect_time_wait, Duration::from_secs(1));
            assert_eq!(config.connect_timeout, None);
        });
    }

    #[test]
    fn test_nats_config_from_env() {
        temp_env::with_vars(
            [
                ("NATS_URL", Some("nats://a:4222, nats://b:4222")),
                ("NATS_CONNECTION_NAME", Some("orders-consumer")),
                ("NATS_ALLOW_RECONNECT", Some("false")),
                ("NATS_MAX_RECONNECT_ATTEMPTS", Some("10")),
                ("NATS_RECONNECT_TIME_WAIT_SECS", Some("3")),
                ("NATS_CONNECT_TIMEOUT_SECS", Some("2")),
            ],
            || {
                let config = NatsConfig::from_env().unwrap();
                assert_eq!(config.servers, vec!["nats://a:4222", "nats://b:4222"]);
                assert_eq!(config.connection_name.as_deref(), Some("orders-consumer"));
                assert!(!config.allow_reconnect);
                assert_eq!(config.max_reconnect_attempts, 10);
                assert_eq!(config.reconnect_time_wait, Duration::from_secs(3));
                assert_eq!(config.connect_timeout, Some(Duration::from_secs(2)));
            },
        );
    }

    #[test]
    fn test_nats_config_invalid_number() {
        temp_env::with_vars(
            [
                ("NATS_URL", None),
                ("NATS_MAX_RECONNECT_ATTEMPTS", Some("lots")),
            ],
            || {
                let err = NatsConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("NATS_MAX_RECONNECT_ATTEMPTS"));
            },
        );
    }

    #[test]
    fn test_nats_config_empty_url() {
        temp_env::with_var("NATS_URL", Some(" , "), || {
            assert!(NatsConfig::from_env().is_err());
        });
    }
}
