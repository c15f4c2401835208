//! Error types for the JetStream binding.

use thiserror::Error;

/// Error that can occur while connecting, binding or consuming.
#[derive(Debug, Error)]
pub enum NatsError {
    /// NATS connection error
    #[error("NATS connection error: {0}")]
    Connection(#[from] async_nats::ConnectError),

    /// A configured server URL could not be parsed
    #[error("Invalid server address '{0}'")]
    InvalidServerAddr(String),

    /// JetStream API error
    #[error("JetStream error: {0}")]
    JetStream(String),

    /// The stream does not exist. Streams are provisioned outside the consumer.
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// Consumer creation or subscription error
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// The delivery carried no readable JetStream metadata
    #[error("Invalid message metadata: {0}")]
    Metadata(String),

    /// Publish error
    #[error("Publish error: {0}")]
    Publish(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid consumer configuration
    #[error("Configuration error: {0}")]
    Config(#[from] messaging::ConfigError),

    /// The worker loop stopped with an error
    #[error(transparent)]
    Runtime(#[from] messaging::ConsumerError),
}

impl NatsError {
    /// Create a JetStream error from an async_nats error.
    pub fn from_jetstream_error(error: impl std::fmt::Display) -> Self {
        Self::JetStream(error.to_string())
    }

    /// Create a consumer error.
    pub fn consumer_error(error: impl std::fmt::Display) -> Self {
        Self::Consumer(error.to_string())
    }

    /// Create a publish error.
    pub fn publish_error(error: impl std::fmt::Display) -> Self {
        Self::Publish(error.to_string())
    }
}
