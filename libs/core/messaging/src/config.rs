//! Consumer configuration.

use crate::error::ConfigError;
use crate::subject;
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString};

/// Durable name used when none is configured.
pub const DEFAULT_DURABLE_NAME: &str = "default";

/// What to do with a message whose handler failed on its last allowed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[derive(Display, AsRefStr, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ErrorAckBehavior {
    /// Nak the message. It stays in the stream for inspection; the broker
    /// stops redelivering once its own `max_deliver` is reached.
    #[default]
    Nak,
    /// Ack the message, accepting its loss.
    Ack,
    /// Neither ack nor nak; the error hook owns the message.
    Delegated,
}

/// How messages are delivered to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[derive(Display, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ConsumerKind {
    /// The broker pushes messages to the deliver subject.
    #[default]
    Push,
    /// The consumer pulls messages in batches.
    Pull,
}

/// Consumer definition trait (type-safe constants).
///
/// # Example
///
/// ```rust
/// use messaging::{ConsumerConfig, ConsumerDef, ErrorAckBehavior};
///
/// struct OrderConsumer;
///
/// impl ConsumerDef for OrderConsumer {
///     const STREAM_NAME: &'static str = "orders";
///     const SUBJECTS: &'static [&'static str] = &["orders.created", "orders.updated"];
///     const ERROR_ACK_BEHAVIOR: ErrorAckBehavior = ErrorAckBehavior::Ack;
/// }
///
/// let config = ConsumerConfig::from_def::<OrderConsumer>().unwrap();
/// assert_eq!(config.filter_subject(), "orders.created");
/// assert_eq!(config.deliver_subject(), "default.deliver");
/// ```
pub trait ConsumerDef {
    /// JetStream stream name (no whitespace, no `.`).
    const STREAM_NAME: &'static str;

    /// Subjects handled by the consumer, in routing order.
    const SUBJECTS: &'static [&'static str];

    /// Filter subject (default: the first subject).
    const FILTER_SUBJECT: Option<&'static str> = None;

    /// Durable name (default: `"default"`).
    const DURABLE_NAME: Option<&'static str> = None;

    /// Maximum deliveries before a failure is terminal (default: 3).
    const MAX_DELIVER: i64 = 3;

    /// Terminal failure policy (default: nak).
    const ERROR_ACK_BEHAVIOR: ErrorAckBehavior = ErrorAckBehavior::Nak;

    /// Push or pull delivery (default: push).
    const KIND: ConsumerKind = ConsumerKind::Push;
}

/// Validated, immutable consumer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    stream_name: String,
    subjects: Vec<String>,
    filter_subject: Option<String>,
    durable_name: Option<String>,
    max_deliver: i64,
    error_ack_behavior: ErrorAckBehavior,
    kind: ConsumerKind,
    ack_wait: Duration,
    max_in_flight: usize,
    batch_size: usize,
    fetch_expires: Duration,
}

impl ConsumerConfig {
    /// Start building a configuration.
    pub fn builder<I, S>(stream_name: impl Into<String>, subjects: I) -> ConsumerConfigBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ConsumerConfigBuilder {
            config: ConsumerConfig {
                stream_name: stream_name.into(),
                subjects: subjects.into_iter().map(Into::into).collect(),
                filter_subject: None,
                durable_name: None,
                max_deliver: 3,
                error_ack_behavior: ErrorAckBehavior::default(),
                kind: ConsumerKind::default(),
                ack_wait: Duration::from_secs(30),
                max_in_flight: 100,
                batch_size: 10,
                fetch_expires: Duration::from_secs(5),
            },
        }
    }

    /// Build from a [`ConsumerDef`].
    pub fn from_def<D: ConsumerDef>() -> Result<Self, ConfigError> {
        let mut builder = Self::builder(D::STREAM_NAME, D::SUBJECTS.iter().copied())
            .with_max_deliver(D::MAX_DELIVER)
            .with_error_ack_behavior(D::ERROR_ACK_BEHAVIOR)
            .with_kind(D::KIND);

        if let Some(filter) = D::FILTER_SUBJECT {
            builder = builder.with_filter_subject(filter);
        }
        if let Some(durable) = D::DURABLE_NAME {
            builder = builder.with_durable_name(durable);
        }

        builder.build()
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    /// Filter subject, falling back to the first subject.
    pub fn filter_subject(&self) -> &str {
        self.filter_subject
            .as_deref()
            .unwrap_or_else(|| self.subjects[0].as_str())
    }

    /// Durable name, falling back to [`DEFAULT_DURABLE_NAME`].
    pub fn durable_name(&self) -> &str {
        self.durable_name.as_deref().unwrap_or(DEFAULT_DURABLE_NAME)
    }

    /// Subject push deliveries are sent to: `<durable_name>.deliver`.
    pub fn deliver_subject(&self) -> String {
        format!("{}.deliver", self.durable_name())
    }

    pub fn max_deliver(&self) -> i64 {
        self.max_deliver
    }

    pub fn error_ack_behavior(&self) -> ErrorAckBehavior {
        self.error_ack_behavior
    }

    pub fn kind(&self) -> ConsumerKind {
        self.kind
    }

    pub fn ack_wait(&self) -> Duration {
        self.ack_wait
    }

    /// Upper bound on concurrently pending handlers.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Messages requested per pull.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// How long a pull request waits for messages.
    pub fn fetch_expires(&self) -> Duration {
        self.fetch_expires
    }

    /// Whether a delivery attempt has used up the allowed deliveries.
    pub fn is_final_attempt(&self, delivered: u64) -> bool {
        i64::try_from(delivered).map_or(true, |delivered| delivered >= self.max_deliver)
    }
}

/// Builder for [`ConsumerConfig`]. Validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct ConsumerConfigBuilder {
    config: ConsumerConfig,
}

impl ConsumerConfigBuilder {
    /// Set the filter subject.
    pub fn with_filter_subject(mut self, subject: impl Into<String>) -> Self {
        self.config.filter_subject = Some(subject.into());
        self
    }

    /// Set the durable name.
    pub fn with_durable_name(mut self, name: impl Into<String>) -> Self {
        self.config.durable_name = Some(name.into());
        self
    }

    /// Set the maximum number of deliveries.
    pub fn with_max_deliver(mut self, max_deliver: i64) -> Self {
        self.config.max_deliver = max_deliver;
        self
    }

    /// Set the terminal failure policy.
    pub fn with_error_ack_behavior(mut self, behavior: ErrorAckBehavior) -> Self {
        self.config.error_ack_behavior = behavior;
        self
    }

    /// Set push or pull delivery.
    pub fn with_kind(mut self, kind: ConsumerKind) -> Self {
        self.config.kind = kind;
        self
    }

    /// Set the broker's ack wait.
    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.config.ack_wait = ack_wait;
        self
    }

    /// Set the in-flight handler bound.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.config.max_in_flight = max;
        self
    }

    /// Set the pull batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the pull expiry.
    pub fn with_fetch_expires(mut self, expires: Duration) -> Self {
        self.config.fetch_expires = expires;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<ConsumerConfig, ConfigError> {
        let config = self.config;

        subject::validate_stream_name(&config.stream_name)?;
        if config.subjects.is_empty() {
            return Err(ConfigError::EmptySubjects);
        }
        for subject in config.subjects.iter().chain(config.filter_subject.as_ref()) {
            subject::validate_subject(subject)?;
        }
        if let Some(durable) = &config.durable_name {
            subject::validate_durable_name(durable)?;
        }
        if config.max_deliver < 1 {
            return Err(ConfigError::InvalidMaxDeliver(config.max_deliver));
        }
        if config.max_in_flight == 0 {
            return Err(ConfigError::InvalidMaxInFlight);
        }

        Ok(config)
    }
}
