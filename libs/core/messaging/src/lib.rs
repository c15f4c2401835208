//! Subject routing and retry handling for JetStream durable consumers.
//!
//! This library is broker-agnostic; `nats-consumer` binds it to NATS
//! JetStream. It provides:
//! - **Subject routing**: maps each subject onto a handler id and dispatches
//!   deliveries to the registered handler
//! - **Consumer runtime**: acks on success, naks while redeliveries remain and
//!   applies a terminal policy on the final attempt
//! - **Worker loop**: processes deliveries concurrently with graceful shutdown
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌─────────────────┐   ┌──────────┐
//! │ subscription │──▶│     Worker     │──▶│ ConsumerRuntime │──▶│ Consumer │
//! │  (Stream)    │   │ (task per msg) │   │  ack/nak/retry  │   │ (router) │
//! └──────────────┘   └────────────────┘   └─────────────────┘   └──────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use messaging::{ConsumerConfig, ConsumerRuntime, SubjectRouter, Worker};
//!
//! let router = SubjectRouter::builder()
//!     .route(["orders.created"], OrderCreated::new(db))
//!     .route(["orders.deleted", "orders-deleted"], OrderDeleted::new(db))
//!     .build()?;
//!
//! let config = ConsumerConfig::builder("ORDERS", ["orders.created", "orders.deleted"])
//!     .with_durable_name("orders-service")
//!     .with_max_deliver(5)
//!     .build()?;
//!
//! let worker = Worker::new(Arc::new(ConsumerRuntime::new(config, router)));
//! worker.run(subscription, shutdown_rx).await?;
//! ```

mod config;
mod consumer;
mod error;
mod message;
mod metrics;
mod router;
mod runtime;
mod subject;
mod worker;

pub mod testing;

pub use config::{
    ConsumerConfig, ConsumerConfigBuilder, ConsumerDef, ConsumerKind, ErrorAckBehavior,
    DEFAULT_DURABLE_NAME,
};
pub use consumer::MessageConsumer;
pub use error::{
    AckError, AckKind, ConfigError, ConsumerError, FallbackReason, HandlerError, HandlerResult,
};
pub use message::{DeliveryMetadata, InboundMessage};
pub use crate::metrics::{init_metrics, ConsumerMetrics};
pub use router::{
    Collision, Fallback, NakFallback, RouterReport, SubjectHandler, SubjectRouter,
    SubjectRouterBuilder,
};
pub use runtime::{ConsumerRuntime, ConsumerStats, Outcome};
pub use subject::{
    is_wildcard, uses_dot_notation, validate_durable_name, validate_stream_name,
    validate_subject, HandlerId, DELIMITER,
};
pub use worker::Worker;
