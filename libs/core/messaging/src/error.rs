//! Error types for message consumption.

use std::fmt;
use thiserror::Error;

/// Error raised by handler logic.
///
/// Handlers return any error they like; the router passes it through
/// unchanged and the runtime decides between retry and terminal failure.
pub type HandlerError = eyre::Report;

/// Result type returned by handlers and consumer hooks.
pub type HandlerResult = Result<(), HandlerError>;

/// Why the router could not resolve a handler for a message.
///
/// Routing failures never reach the caller as errors; they are always
/// resolved by the router's fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackReason {
    /// The subject is not one of the router's registered subjects.
    UnhandledSubject,
    /// The subject is registered but has no handler identifier.
    NoMapping,
    /// A handler identifier exists but no handler was bound to it.
    NotImplemented,
}

impl FallbackReason {
    /// Stable name used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::UnhandledSubject => "unhandled_subject",
            FallbackReason::NoMapping => "no_mapping",
            FallbackReason::NotImplemented => "not_implemented",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invalid consumer or router configuration.
///
/// Raised eagerly at construction time and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Stream name is empty or contains whitespace or the subject delimiter.
    #[error("invalid stream name '{0}': must be non-empty and contain no whitespace or '.'")]
    InvalidStreamName(String),

    /// Durable name is empty or contains characters the broker rejects.
    #[error("invalid durable name '{0}': must be non-empty and contain no whitespace, '.', '*' or '>'")]
    InvalidDurableName(String),

    /// No subjects were configured.
    #[error("at least one subject is required")]
    EmptySubjects,

    /// Subject is empty or has an empty token (`orders..created`).
    #[error("invalid subject '{0}': tokens must not be empty")]
    InvalidSubject(String),

    /// `max_deliver` must allow at least one delivery.
    #[error("max_deliver must be at least 1, got {0}")]
    InvalidMaxDeliver(i64),

    /// `max_in_flight` must allow at least one pending handler.
    #[error("max_in_flight must be at least 1")]
    InvalidMaxInFlight,
}

/// Which acknowledgment was being sent when the broker call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Ack,
    Nak,
}

impl fmt::Display for AckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckKind::Ack => write!(f, "ack"),
            AckKind::Nak => write!(f, "nak"),
        }
    }
}

/// Failure to deliver an ack or nak to the broker.
#[derive(Debug, Error)]
#[error("failed to {kind} message: {message}")]
pub struct AckError {
    pub kind: AckKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AckError {
    /// Create an ack error without an underlying source.
    pub fn new(kind: AckKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create an ack error wrapping the broker client's error.
    pub fn with_source(
        kind: AckKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }
}

/// Error returned by the consumer runtime for a single message.
///
/// Handler failures are not errors of the runtime: they are turned into a
/// nak or a terminal outcome. Only broker I/O and the error hook surface here.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The ack or nak could not be sent.
    #[error(transparent)]
    Ack(#[from] AckError),

    /// The terminal-failure hook itself failed.
    #[error("error hook failed: {0:#}")]
    ErrorHook(HandlerError),

    /// The subscription failed or ended while the worker was running.
    #[error("subscription error: {0}")]
    Subscription(String),
}
