//! Configuration for the orders consumer service

use core_config::{env_or_default, env_parse, ConfigError, FromEnv, NatsConfig};
use std::net::SocketAddr;

pub const DEFAULT_DEAD_LETTER_SUBJECT: &str = "dlq.orders";

#[derive(Debug, Clone)]
pub struct Config {
    pub nats: NatsConfig,

    /// Subject terminal failures are republished to
    pub dead_letter_subject: String,

    /// Prometheus listener; metrics are not exported when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl FromEnv for Config {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            nats: NatsConfig::from_env()?,
            dead_letter_subject: env_or_default(
                "ORDERS_DEAD_LETTER_SUBJECT",
                DEFAULT_DEAD_LETTER_SUBJECT,
            ),
            metrics_addr: env_parse("METRICS_ADDR")?,
        })
    }
}
