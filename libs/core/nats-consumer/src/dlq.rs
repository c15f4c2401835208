//! Dead-letter republishing for terminal failures.

use crate::error::NatsError;
use async_nats::jetstream::Context;
use chrono::{DateTime, Utc};
use messaging::{HandlerError, InboundMessage};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Publishes failed deliveries to a dead-letter subject.
///
/// Meant for error hooks of consumers using the `Delegated` policy: publish
/// the entry, then ack the original.
///
/// The subject must be captured by a stream for entries to be persisted.
#[derive(Clone)]
pub struct DeadLetterPublisher {
    jetstream: Context,
    subject: String,
}

impl DeadLetterPublisher {
    pub fn new(jetstream: Context, subject: impl Into<String>) -> Self {
        Self {
            jetstream,
            subject: subject.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Publish a failed delivery and wait for the broker's ack.
    ///
    /// Returns the dead-letter stream sequence.
    pub async fn publish<M: InboundMessage>(
        &self,
        message: &M,
        error: &HandlerError,
        attempt: u64,
    ) -> Result<u64, NatsError> {
        self.publish_entry(&DeadLetterEntry::new(message, error, attempt))
            .await
    }

    /// Publish a prepared entry and wait for the broker's ack.
    pub async fn publish_entry(&self, entry: &DeadLetterEntry) -> Result<u64, NatsError> {
        let payload = serde_json::to_vec(entry)?;

        let ack = self
            .jetstream
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(NatsError::publish_error)?
            .await
            .map_err(NatsError::publish_error)?;

        debug!(
            subject = %entry.subject,
            original_sequence = entry.stream_sequence,
            sequence = ack.sequence,
            "Published dead letter"
        );

        Ok(ack.sequence)
    }
}

/// Entry published for a delivery that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Subject of the failed delivery
    pub subject: String,
    /// Raw payload of the failed delivery
    pub payload: Vec<u8>,
    /// Original stream sequence number
    pub stream_sequence: u64,
    /// Delivery attempt that failed
    pub attempt: u64,
    /// Handler error, with its cause chain
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new<M: InboundMessage>(message: &M, error: &HandlerError, attempt: u64) -> Self {
        Self {
            subject: message.subject().to_string(),
            payload: message.payload().to_vec(),
            stream_sequence: message.metadata().stream_sequence,
            attempt,
            error: format!("{error:#}"),
            failed_at: Utc::now(),
        }
    }
}
