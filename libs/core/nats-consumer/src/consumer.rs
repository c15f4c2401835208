//! Durable consumer binding.

use crate::error::NatsError;
use crate::message::JetStreamMessage;
use async_nats::jetstream::consumer::{pull, push, AckPolicy, Consumer};
use async_nats::jetstream::context::GetStreamErrorKind;
use async_nats::jetstream::ErrorCode;
use async_nats::jetstream::{self, Context};
use futures::stream::BoxStream;
use futures::StreamExt;
use messaging::{ConsumerConfig, ConsumerKind, ConsumerRuntime, MessageConsumer, Worker};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, instrument};

/// Deliveries from a bound consumer.
pub type MessageStream = BoxStream<'static, Result<JetStreamMessage, NatsError>>;

enum Binding {
    Push(Consumer<push::Config>),
    Pull(Consumer<pull::Config>),
}

/// A durable JetStream consumer bound to an existing stream.
pub struct NatsConsumer {
    config: ConsumerConfig,
    binding: Binding,
}

impl NatsConsumer {
    /// Look up the stream and get or create the durable consumer.
    ///
    /// The stream must already exist.
    #[instrument(
        skip_all,
        fields(stream = %config.stream_name(), durable = %config.durable_name(), kind = %config.kind())
    )]
    pub async fn bind(jetstream: &Context, config: ConsumerConfig) -> Result<Self, NatsError> {
        let stream = lookup_stream(jetstream, config.stream_name()).await?;

        let binding = match config.kind() {
            ConsumerKind::Push => Binding::Push(
                stream
                    .get_or_create_consumer(config.durable_name(), push_config(&config))
                    .await
                    .map_err(NatsError::consumer_error)?,
            ),
            ConsumerKind::Pull => Binding::Pull(
                stream
                    .get_or_create_consumer(config.durable_name(), pull_config(&config))
                    .await
                    .map_err(NatsError::consumer_error)?,
            ),
        };

        info!(
            filter_subject = %config.filter_subject(),
            max_deliver = config.max_deliver(),
            "Durable consumer bound"
        );

        Ok(Self { config, binding })
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Subscribe to deliveries.
    ///
    /// Deliveries whose JetStream metadata cannot be read are yielded as
    /// [`NatsError::Metadata`].
    pub async fn messages(&self) -> Result<MessageStream, NatsError> {
        let messages = match &self.binding {
            Binding::Push(consumer) => consumer
                .messages()
                .await
                .map_err(NatsError::consumer_error)?
                .map(|delivery| {
                    delivery
                        .map_err(NatsError::consumer_error)
                        .and_then(JetStreamMessage::try_from)
                })
                .boxed(),
            Binding::Pull(consumer) => consumer
                .stream()
                .max_messages_per_batch(self.config.batch_size())
                .expires(self.config.fetch_expires())
                .messages()
                .await
                .map_err(NatsError::consumer_error)?
                .map(|delivery| {
                    delivery
                        .map_err(NatsError::consumer_error)
                        .and_then(JetStreamMessage::try_from)
                })
                .boxed(),
        };

        Ok(messages)
    }

    /// Subscribe and drive `runtime` until shutdown or the subscription ends.
    ///
    /// The runtime is passed in so its counters survive restarts.
    pub async fn run<C>(
        &self,
        runtime: Arc<ConsumerRuntime<JetStreamMessage, C>>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), NatsError>
    where
        C: MessageConsumer<JetStreamMessage> + 'static,
    {
        let messages = self.messages().await?;
        Worker::new(runtime).run(messages, shutdown_rx).await?;
        Ok(())
    }
}

async fn lookup_stream(
    jetstream: &Context,
    name: &str,
) -> Result<jetstream::stream::Stream, NatsError> {
    jetstream.get_stream(name).await.map_err(|e| match e.kind() {
        GetStreamErrorKind::JetStream(source) if source.error_code() == ErrorCode::STREAM_NOT_FOUND => {
            NatsError::StreamNotFound(name.to_string())
        }
        _ => NatsError::from_jetstream_error(e),
    })
}

fn push_config(config: &ConsumerConfig) -> push::Config {
    push::Config {
        durable_name: Some(config.durable_name().to_string()),
        deliver_subject: config.deliver_subject(),
        filter_subject: config.filter_subject().to_string(),
        ack_policy: AckPolicy::Explicit,
        ack_wait: config.ack_wait(),
        max_deliver: config.max_deliver(),
        max_ack_pending: max_ack_pending(config),
        ..Default::default()
    }
}

fn pull_config(config: &ConsumerConfig) -> pull::Config {
    pull::Config {
        durable_name: Some(config.durable_name().to_string()),
        filter_subject: config.filter_subject().to_string(),
        ack_policy: AckPolicy::Explicit,
        ack_wait: config.ack_wait(),
        max_deliver: config.max_deliver(),
        max_ack_pending: max_ack_pending(config),
        ..Default::default()
    }
}

fn max_ack_pending(config: &ConsumerConfig) -> i64 {
    i64::try_from(config.max_in_flight()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::ErrorAckBehavior;
    use std::time::Duration;

    fn config() -> ConsumerConfig {
        ConsumerConfig::builder("ORDERS", ["orders.created", "orders.updated"])
            .with_durable_name("orders-service")
            .with_max_deliver(5)
            .with_ack_wait(Duration::from_secs(10))
            .with_max_in_flight(20)
            .with_error_ack_behavior(ErrorAckBehavior::Ack)
            .build()
            .unwrap()
    }

    #[test]
    fn test_push_config() {
        let push = push_config(&config());

        assert_eq!(push.durable_name.as_deref(), Some("orders-service"));
        assert_eq!(push.deliver_subject, "orders-service.deliver");
        assert_eq!(push.filter_subject, "orders.created");
        assert_eq!(push.ack_policy, AckPolicy::Explicit);
        assert_eq!(push.ack_wait, Duration::from_secs(10));
        assert_eq!(push.max_deliver, 5);
        assert_eq!(push.max_ack_pending, 20);
    }

    #[test]
    fn test_pull_config() {
        let config = ConsumerConfig::builder("ORDERS", ["orders.created", "orders.updated"])
            .with_filter_subject("orders.>")
            .with_kind(ConsumerKind::Pull)
            .build()
            .unwrap();

        let pull = pull_config(&config);

        assert_eq!(pull.durable_name.as_deref(), Some("default"));
        assert_eq!(pull.filter_subject, "orders.>");
        assert_eq!(pull.ack_policy, AckPolicy::Explicit);
        assert_eq!(pull.max_deliver, 3);
        assert_eq!(pull.ack_wait, Duration::from_secs(30));
    }

    mod jetstream_tests {
        use super::*;
        use async_trait::async_trait;
        use messaging::{
            Fallback, FallbackReason, HandlerResult, InboundMessage, SubjectHandler, SubjectRouter,
        };
        use std::sync::atomic::{AtomicUsize, Ordering};
        use test_utils::TestNats;

        struct FailsFirstDelivery {
            calls: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl SubjectHandler<JetStreamMessage> for FailsFirstDelivery {
            async fn handle(&self, message: &JetStreamMessage) -> HandlerResult {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if message.metadata().delivered == 1 {
                    eyre::bail!("first delivery always fails");
                }
                Ok(())
            }
        }

        struct CountingNak {
            calls: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Fallback<JetStreamMessage> for CountingNak {
            async fn fallback(
                &self,
                message: &JetStreamMessage,
                _reason: FallbackReason,
            ) -> HandlerResult {
                self.calls.fetch_add(1, Ordering::SeqCst);
                message.nak().await?;
                Ok(())
            }
        }

        #[tokio::test]
        #[ignore = "requires docker"]
        async fn test_bind_missing_stream() {
            let nats = TestNats::new().await;
            let config = ConsumerConfig::builder("MISSING", ["missing.created"])
                .build()
                .unwrap();

            let result = NatsConsumer::bind(&nats.jetstream(), config).await;

            assert!(matches!(result, Err(NatsError::StreamNotFound(ref name)) if name == "MISSING"));
        }

        #[tokio::test]
        #[ignore = "requires docker"]
        async fn test_redelivery_after_nak() {
            let nats = TestNats::new().await;
            let jetstream = nats.jetstream();
            nats.create_stream("ORDERS", &["orders.>"]).await;

            let calls = Arc::new(AtomicUsize::new(0));
            let router = Arc::new(
                SubjectRouter::<JetStreamMessage>::builder()
                    .route(
                        ["orders.created"],
                        FailsFirstDelivery {
                            calls: calls.clone(),
                        },
                    )
                    .build()
                    .unwrap(),
            );

            nats.publish("orders.created", r#"{"id":1}"#).await;

            for kind in [ConsumerKind::Push, ConsumerKind::Pull] {
                let durable = format!("orders-{kind}");
                let config = ConsumerConfig::builder("ORDERS", ["orders.created"])
                    .with_durable_name(durable)
                    .with_kind(kind)
                    .with_fetch_expires(Duration::from_secs(1))
                    .build()
                    .unwrap();
                let consumer = NatsConsumer::bind(&jetstream, config.clone()).await.unwrap();
                let runtime = Arc::new(ConsumerRuntime::new(config, router.clone()));

                let (shutdown_tx, shutdown_rx) = watch::channel(false);
                let handle = tokio::spawn({
                    let runtime = runtime.clone();
                    async move { consumer.run(runtime, shutdown_rx).await }
                });

                tokio::time::timeout(Duration::from_secs(10), async {
                    while runtime.stats().total_success_count == 0 {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                })
                .await
                .expect("message was not redelivered");

                shutdown_tx.send(true).unwrap();
                handle.await.unwrap().unwrap();
                assert_eq!(runtime.stats().total_error_count, 0);
            }

            assert_eq!(calls.load(Ordering::SeqCst), 4);
        }

        #[tokio::test]
        #[ignore = "requires docker"]
        async fn test_unrouted_message_is_redelivered() {
            let nats = TestNats::new().await;
            let jetstream = nats.jetstream();
            nats.create_stream("ORDERS", &["orders.>"]).await;

            let fallbacks = Arc::new(AtomicUsize::new(0));
            let router = SubjectRouter::<JetStreamMessage>::builder()
                .route(
                    ["orders.created"],
                    FailsFirstDelivery {
                        calls: Arc::new(AtomicUsize::new(0)),
                    },
                )
                .fallback(CountingNak {
                    calls: fallbacks.clone(),
                })
                .build()
                .unwrap();

            nats.publish("orders.archived", r#"{"id":1}"#).await;

            let config = ConsumerConfig::builder("ORDERS", ["orders.created"])
                .with_filter_subject("orders.>")
                .with_durable_name("orders-unrouted")
                .with_max_deliver(5)
                .build()
                .unwrap();
            let consumer = NatsConsumer::bind(&jetstream, config.clone()).await.unwrap();
            let runtime = Arc::new(ConsumerRuntime::new(config, router));

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = tokio::spawn({
                let runtime = runtime.clone();
                async move { consumer.run(runtime, shutdown_rx).await }
            });

            tokio::time::timeout(Duration::from_secs(10), async {
                while fallbacks.load(Ordering::SeqCst) < 2 {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            })
            .await
            .expect("unrouted message was not redelivered");

            shutdown_tx.send(true).unwrap();
            handle.await.unwrap().unwrap();
            assert_eq!(runtime.stats().total_success_count, 0);
        }
    }
}
