//! Orders consumer service
//!
//! Runs one named JetStream consumer and keeps it running.
//!
//! ## Architecture
//!
//! ```text
//! NATS JetStream (ORDERS stream)
//!   ↓ (Push consumer: orders-consumer)
//! ConsumerRuntime + SubjectRouter
//!   ↓ (orders.created / orders.updated / orders.deleted)
//! OrderProjection
//!   ↓ (final attempt failed)
//! Dead letters (dlq.orders)
//! ```
//!
//! ## Features
//!
//! - Consumer selected by name on the command line
//! - Restart one second after the consumer stops with an error
//! - Graceful shutdown on SIGINT/SIGTERM, draining in-flight messages
//! - Prometheus metrics when `METRICS_ADDR` is set

pub mod config;
pub mod consumers;
pub mod supervisor;

use crate::config::Config;
use crate::consumers::ConsumerName;
use crate::supervisor::{supervise, RESTART_DELAY};
use clap::{Parser, ValueEnum};
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::{Environment, FromEnv};
use eyre::{Result, WrapErr};
use messaging::ConsumerRuntime;
use nats_consumer::{DeadLetterPublisher, NatsConsumer};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "orders-consumer")]
#[command(about = "Run a JetStream consumer until interrupted")]
pub struct Cli {
    /// Name of the consumer to run
    pub consumer: String,

    /// Log level (overrides RUST_LOG)
    #[arg(long, value_enum, ignore_case = true)]
    pub log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum LogLevel {
    Error,
    #[value(alias = "WARN")]
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// Run the consumer named on the command line.
///
/// # Errors
///
/// Returns an error if configuration is invalid, the consumer is unknown or
/// NATS cannot be reached. Errors of a running consumer lead to a restart.
pub async fn run(cli: Cli) -> Result<()> {
    install_color_eyre();

    let environment = Environment::from_env();
    init_tracing(&environment, cli.log_level.map(LogLevel::directive));

    let name = ConsumerName::lookup(&cli.consumer)?;
    let mut config = Config::from_env().wrap_err("Failed to load configuration")?;
    if config.nats.connection_name.is_none() {
        config.nats.connection_name = Some(format!("orders-consumer:{name}"));
    }

    if let Some(addr) = config.metrics_addr {
        messaging::init_metrics(addr).wrap_err("Failed to install metrics exporter")?;
        info!(%addr, "Prometheus metrics exporter listening");
    }

    info!(consumer = %name, ?environment, "Starting consumer service");

    let client = nats_consumer::connect(&config.nats)
        .await
        .wrap_err_with(|| format!("Failed to connect to NATS at {:?}", config.nats.servers))?;
    let jetstream = async_nats::jetstream::new(client);

    let dead_letters = Arc::new(DeadLetterPublisher::new(
        jetstream.clone(),
        config.dead_letter_subject.as_str(),
    ));
    let registered = name.build(dead_letters)?;
    registered.report.log();

    let consumer_config = registered.config;
    let runtime = Arc::new(ConsumerRuntime::new(
        consumer_config.clone(),
        registered.consumer,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    supervise(
        |shutdown_rx| {
            let jetstream = jetstream.clone();
            let config = consumer_config.clone();
            let runtime = runtime.clone();
            async move {
                let consumer = NatsConsumer::bind(&jetstream, config).await?;
                consumer.run(runtime, shutdown_rx).await
            }
        },
        shutdown_rx,
        RESTART_DELAY,
    )
    .await;

    let stats = runtime.stats();
    info!(
        consumer = %name,
        total_success_count = stats.total_success_count,
        total_error_count = stats.total_error_count,
        "Consumer service stopped"
    );
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}
