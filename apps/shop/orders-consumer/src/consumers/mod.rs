//! Registry of the consumers this service can run.

pub mod orders;

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use messaging::{ConsumerConfig, MessageConsumer, RouterReport};
use nats_consumer::{DeadLetterEntry, DeadLetterPublisher, JetStreamMessage, NatsError};
use std::sync::Arc;
use strum::{Display, EnumString, VariantNames};

/// Destination for deliveries that exhausted their attempts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeadLetters: Send + Sync {
    /// Publish the entry, returning its dead-letter sequence.
    async fn publish(&self, entry: &DeadLetterEntry) -> Result<u64, NatsError>;
}

#[async_trait]
impl DeadLetters for DeadLetterPublisher {
    async fn publish(&self, entry: &DeadLetterEntry) -> Result<u64, NatsError> {
        self.publish_entry(entry).await
    }
}

/// A consumer ready to be bound and run.
pub struct RegisteredConsumer {
    pub config: ConsumerConfig,
    pub consumer: Arc<dyn MessageConsumer<JetStreamMessage>>,
    /// Routing self-check, logged before the consumer starts.
    pub report: RouterReport,
}

/// Consumers known to this service, by command-line name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, VariantNames)]
#[strum(serialize_all = "snake_case")]
pub enum ConsumerName {
    Orders,
}

impl ConsumerName {
    /// Look a consumer up by name.
    pub fn lookup(name: &str) -> Result<Self> {
        name.parse().map_err(|_| {
            eyre!(
                "unknown consumer '{name}', available: {}",
                Self::VARIANTS.join(", ")
            )
        })
    }

    pub fn config(&self) -> Result<ConsumerConfig> {
        let config = match self {
            ConsumerName::Orders => ConsumerConfig::from_def::<orders::OrdersConsumerDef>(),
        };
        config.wrap_err_with(|| format!("invalid configuration for consumer '{self}'"))
    }

    /// Build the consumer, its configuration and its routing self-check.
    pub fn build(&self, dead_letters: Arc<dyn DeadLetters>) -> Result<RegisteredConsumer> {
        let (consumer, report) = match self {
            ConsumerName::Orders => {
                let orders = orders::OrdersConsumer::<JetStreamMessage>::new(
                    &orders::OrderProjection::default(),
                    dead_letters,
                )?;
                let report = orders.router().report();
                let consumer: Arc<dyn MessageConsumer<JetStreamMessage>> = Arc::new(orders);
                (consumer, report)
            }
        };

        Ok(RegisteredConsumer {
            config: self.config()?,
            consumer,
            report,
        })
    }
}
