//! Per-message ack/nak state machine.
//!
//! | delivery attempt     | handler | action                                      |
//! |----------------------|---------|---------------------------------------------|
//! | `< max_deliver`      | ok      | ack, success + 1                            |
//! | `< max_deliver`      | error   | nak (broker redelivers)                     |
//! | `>= max_deliver`     | ok      | ack, success + 1                            |
//! | `>= max_deliver`     | error   | error + 1, `handle_error`, ack/nak/nothing  |
//!
//! The delivery attempt always comes from the broker's metadata; retry
//! timing is left to the broker. A delivery the consumer already settled
//! itself (a router fallback, an error hook) gets no further ack or nak.

use crate::config::{ConsumerConfig, ErrorAckBehavior};
use crate::consumer::MessageConsumer;
use crate::error::{ConsumerError, HandlerError};
use crate::message::InboundMessage;
use crate::metrics::ConsumerMetrics;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

/// What the runtime did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handler succeeded, message acked.
    Acked,
    /// Handler failed with deliveries left, message nak'ed.
    Retrying,
    /// Handler failed on the final delivery; the policy that was applied.
    Terminal(ErrorAckBehavior),
    /// Handler succeeded but had already settled the message itself. Not
    /// counted as a success.
    Settled,
}

/// Snapshot of a runtime's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsumerStats {
    pub total_success_count: u64,
    pub total_error_count: u64,
}

#[derive(Debug, Default)]
struct Counters {
    success: AtomicU64,
    error: AtomicU64,
}

/// Drives a [`MessageConsumer`] for one durable consumer.
///
/// Counters live as long as the runtime and only ever grow.
pub struct ConsumerRuntime<M, C> {
    config: Arc<ConsumerConfig>,
    consumer: C,
    counters: Counters,
    metrics: ConsumerMetrics,
    _marker: PhantomData<fn(M)>,
}

impl<M, C> ConsumerRuntime<M, C>
where
    M: InboundMessage,
    C: MessageConsumer<M>,
{
    /// Create a runtime for `consumer`.
    pub fn new(config: ConsumerConfig, consumer: C) -> Self {
        let metrics = ConsumerMetrics::new(config.stream_name(), config.durable_name());
        Self {
            config: Arc::new(config),
            consumer,
            counters: Counters::default(),
            metrics,
            _marker: PhantomData,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    /// Current counter values.
    pub fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            total_success_count: self.counters.success.load(Ordering::Relaxed),
            total_error_count: self.counters.error.load(Ordering::Relaxed),
        }
    }

    /// Handle one delivery and settle it with the broker.
    ///
    /// The handler runs exactly once. Handler errors are turned into a nak or
    /// a terminal outcome; only ack/nak I/O failures and errors from
    /// `handle_error` are returned.
    #[instrument(
        skip_all,
        fields(
            subject = %message.subject(),
            sequence = message.metadata().stream_sequence,
            attempt = message.metadata().delivered,
        )
    )]
    pub async fn process_message(&self, message: &M) -> Result<Outcome, ConsumerError> {
        let attempt = message.metadata().delivered;
        self.metrics.message_received();

        if message.metadata().is_redelivery() {
            debug!(attempt, "Processing redelivered message");
        }

        let start = Instant::now();
        let result = self.consumer.handle_message(message).await;
        let duration = start.elapsed();

        match result {
            Ok(()) if message.is_settled() => {
                debug!("Message settled by the consumer, nothing to send");
                Ok(Outcome::Settled)
            }
            Ok(()) => {
                message.ack().await?;
                self.counters.success.fetch_add(1, Ordering::Relaxed);
                self.metrics.message_processed(duration);

                debug!(duration_ms = duration.as_millis() as u64, "Message processed");
                Ok(Outcome::Acked)
            }
            Err(error) if !self.config.is_final_attempt(attempt) => {
                warn!(
                    error = %error,
                    attempt,
                    max_deliver = self.config.max_deliver(),
                    "Handler failed, requesting redelivery"
                );
                self.metrics.message_retried();
                if !message.is_settled() {
                    message.nak().await?;
                }
                Ok(Outcome::Retrying)
            }
            Err(error) => self.handle_terminal(message, error, attempt).await,
        }
    }

    async fn handle_terminal(
        &self,
        message: &M,
        error: HandlerError,
        attempt: u64,
    ) -> Result<Outcome, ConsumerError> {
        let behavior = self.config.error_ack_behavior();

        self.counters.error.fetch_add(1, Ordering::Relaxed);
        self.metrics.message_failed(behavior);

        error!(
            error = %format!("{error:#}"),
            attempt,
            max_deliver = self.config.max_deliver(),
            behavior = %behavior,
            "Handler failed on final delivery"
        );

        self.consumer
            .handle_error(message, &error, attempt)
            .await
            .map_err(ConsumerError::ErrorHook)?;

        match behavior {
            _ if message.is_settled() => {
                debug!(behavior = %behavior, "Message settled by error hook");
            }
            ErrorAckBehavior::Nak => message.nak().await?,
            ErrorAckBehavior::Ack => message.ack().await?,
            ErrorAckBehavior::Delegated => {
                debug!("Terminal failure delegated to error hook");
            }
        }

        Ok(Outcome::Terminal(behavior))
    }
}
