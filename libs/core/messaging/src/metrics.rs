//! Prometheus metrics for consumers.
//!
//! Metrics go through the `metrics` facade; nothing is recorded until the
//! process installs a recorder (see [`init_metrics`]).

use crate::config::ErrorAckBehavior;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

/// Metrics for one consumer.
#[derive(Debug, Clone)]
pub struct ConsumerMetrics {
    stream_name: String,
    durable_name: String,
}

impl ConsumerMetrics {
    pub fn new(stream_name: &str, durable_name: &str) -> Self {
        Self {
            stream_name: stream_name.to_string(),
            durable_name: durable_name.to_string(),
        }
    }

    /// Record a message received.
    pub fn message_received(&self) {
        counter!(
            "nats_consumer_messages_received_total",
            "stream" => self.stream_name.clone(),
            "durable" => self.durable_name.clone()
        )
        .increment(1);
    }

    /// Record a message handled successfully.
    pub fn message_processed(&self, duration: Duration) {
        counter!(
            "nats_consumer_messages_processed_total",
            "stream" => self.stream_name.clone(),
            "durable" => self.durable_name.clone()
        )
        .increment(1);

        histogram!(
            "nats_consumer_message_duration_seconds",
            "stream" => self.stream_name.clone(),
            "durable" => self.durable_name.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a failed delivery that the broker will redeliver.
    pub fn message_retried(&self) {
        counter!(
            "nats_consumer_messages_retried_total",
            "stream" => self.stream_name.clone(),
            "durable" => self.durable_name.clone()
        )
        .increment(1);
    }

    /// Record a failure on the final allowed delivery.
    pub fn message_failed(&self, behavior: ErrorAckBehavior) {
        counter!(
            "nats_consumer_messages_failed_total",
            "stream" => self.stream_name.clone(),
            "durable" => self.durable_name.clone(),
            "behavior" => behavior.to_string()
        )
        .increment(1);
    }
}

/// Install the Prometheus recorder and serve `/metrics` on `listen`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(listen: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(listen).install()
}
