//! Connection bootstrap.

use crate::error::NatsError;
use async_nats::{Client, ConnectOptions, ServerAddr};
use core_config::NatsConfig;
use tracing::{info, instrument};

/// Build client options from configuration.
///
/// async-nats cannot switch reconnection off entirely; with
/// `allow_reconnect = false` a single reconnect attempt is allowed.
pub fn connect_options(config: &NatsConfig) -> ConnectOptions {
    let reconnect_time_wait = config.reconnect_time_wait;
    let max_reconnects = if config.allow_reconnect {
        config.max_reconnect_attempts
    } else {
        1
    };

    let mut options = ConnectOptions::new()
        .max_reconnects(Some(max_reconnects))
        .reconnect_delay_callback(move |_attempts| reconnect_time_wait);

    if let Some(name) = &config.connection_name {
        options = options.name(name);
    }
    if let Some(timeout) = config.connect_timeout {
        options = options.connection_timeout(timeout);
    }

    options
}

/// Parse the configured server URLs.
pub fn server_addrs(config: &NatsConfig) -> Result<Vec<ServerAddr>, NatsError> {
    config
        .servers
        .iter()
        .map(|url| {
            url.parse::<ServerAddr>()
                .map_err(|_| NatsError::InvalidServerAddr(url.clone()))
        })
        .collect()
}

/// Connect to NATS.
#[instrument(skip_all, fields(servers = ?config.servers))]
pub async fn connect(config: &NatsConfig) -> Result<Client, NatsError> {
    let addrs = server_addrs(config)?;
    let client = connect_options(config).connect(addrs.as_slice()).await?;

    info!(
        name = config.connection_name.as_deref().unwrap_or_default(),
        "Connected to NATS"
    );

    Ok(client)
}
