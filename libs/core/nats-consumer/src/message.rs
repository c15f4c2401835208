//! JetStream deliveries as [`InboundMessage`]s.

use crate::error::NatsError;
use async_nats::jetstream;
use async_trait::async_trait;
use messaging::{AckError, AckKind, DeliveryMetadata, InboundMessage};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// A JetStream delivery with its metadata already parsed.
///
/// Built with `TryFrom<jetstream::Message>`; deliveries without JetStream
/// metadata (plain core NATS messages) are rejected. Only the first ack or
/// nak reaches the broker: an ack after a nak would drop the message from
/// redelivery.
pub struct JetStreamMessage {
    message: jetstream::Message,
    metadata: DeliveryMetadata,
    settled: AtomicBool,
}

impl JetStreamMessage {
    async fn settle<F>(&self, kind: AckKind, send: F) -> Result<(), AckError>
    where
        F: Future<Output = Result<(), async_nats::Error>>,
    {
        if self.settled.swap(true, Ordering::AcqRel) {
            debug!(
                subject = %self.subject(),
                sequence = self.metadata.stream_sequence,
                %kind,
                "Message already settled, not sending"
            );
            return Ok(());
        }

        send.await.map_err(|e| {
            self.settled.store(false, Ordering::Release);
            ack_error(kind, e)
        })
    }
}

impl fmt::Debug for JetStreamMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JetStreamMessage")
            .field("subject", &self.subject())
            .field("metadata", &self.metadata)
            .field("settled", &self.is_settled())
            .finish_non_exhaustive()
    }
}

impl TryFrom<jetstream::Message> for JetStreamMessage {
    type Error = NatsError;

    fn try_from(message: jetstream::Message) -> Result<Self, Self::Error> {
        let metadata = {
            let info = message
                .info()
                .map_err(|e| NatsError::Metadata(e.to_string()))?;

            DeliveryMetadata {
                stream_sequence: info.stream_sequence,
                consumer_sequence: info.consumer_sequence,
                delivered: delivery_attempt(info.delivered)?,
                pending: info.pending,
            }
        };

        Ok(Self {
            message,
            metadata,
            settled: AtomicBool::new(false),
        })
    }
}

/// Validate the broker's delivery counter.
pub(crate) fn delivery_attempt(delivered: i64) -> Result<u64, NatsError> {
    match u64::try_from(delivered) {
        Ok(attempt) if attempt >= 1 => Ok(attempt),
        _ => Err(NatsError::Metadata(format!(
            "delivery count must be at least 1, got {delivered}"
        ))),
    }
}

fn ack_error(kind: AckKind, error: async_nats::Error) -> AckError {
    AckError {
        kind,
        message: error.to_string(),
        source: Some(error),
    }
}

#[async_trait]
impl InboundMessage for JetStreamMessage {
    fn subject(&self) -> &str {
        self.message.subject.as_str()
    }

    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn metadata(&self) -> DeliveryMetadata {
        self.metadata
    }

    async fn ack(&self) -> Result<(), AckError> {
        self.settle(AckKind::Ack, self.message.ack()).await
    }

    async fn nak(&self) -> Result<(), AckError> {
        self.settle(AckKind::Nak, self.message.ack_with(jetstream::AckKind::Nak(None)))
            .await
    }

    fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }
}
