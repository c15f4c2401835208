//! NATS JetStream binding for the `messaging` consumer runtime.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────┐     ┌────────────────────┐     ┌─────────────────┐
//! │  NATS JetStream   │────▶│    NatsConsumer    │────▶│ ConsumerRuntime │
//! │ (existing stream) │     │ (push/pull durable)│     │ + SubjectRouter │
//! └───────────────────┘     └────────────────────┘     └─────────────────┘
//!                                                               │
//!                                                               ▼
//!                                                     ┌─────────────────────┐
//!                                                     │ DeadLetterPublisher │
//!                                                     │ (terminal failures) │
//!                                                     └─────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use nats_consumer::{connect, NatsConsumer};
//!
//! let client = connect(&NatsConfig::from_env()?).await?;
//! let jetstream = async_nats::jetstream::new(client);
//!
//! let consumer = NatsConsumer::bind(&jetstream, config.clone()).await?;
//! let runtime = Arc::new(ConsumerRuntime::new(config, router));
//! consumer.run(runtime, shutdown_rx).await?;
//! ```

mod client;
mod consumer;
mod dlq;
mod error;
mod message;

pub use client::{connect, connect_options, server_addrs};
pub use consumer::{MessageStream, NatsConsumer};
pub use dlq::{DeadLetterEntry, DeadLetterPublisher};
pub use error::NatsError;
pub use message::JetStreamMessage;
