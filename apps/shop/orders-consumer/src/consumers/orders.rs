//! Order event consumer.
//!
//! Keeps an in-memory projection of orders up to date from the `ORDERS`
//! stream. Deliveries that still fail on their last attempt are republished
//! to the dead-letter subject and acked.

use super::DeadLetters;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::WrapErr;
use messaging::{
    ConfigError, ConsumerDef, ConsumerKind, ErrorAckBehavior, HandlerError, HandlerResult,
    InboundMessage, MessageConsumer, SubjectHandler, SubjectRouter,
};
use nats_consumer::DeadLetterEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct OrdersConsumerDef;

impl ConsumerDef for OrdersConsumerDef {
    const STREAM_NAME: &'static str = "ORDERS";
    const SUBJECTS: &'static [&'static str] =
        &["orders.created", "orders.updated", "orders.deleted"];
    const FILTER_SUBJECT: Option<&'static str> = Some("orders.>");
    const DURABLE_NAME: Option<&'static str> = Some("orders-consumer");
    const MAX_DELIVER: i64 = 5;
    const ERROR_ACK_BEHAVIOR: ErrorAckBehavior = ErrorAckBehavior::Delegated;
    const KIND: ConsumerKind = ConsumerKind::Push;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdated {
    pub id: Uuid,
    pub status: OrderStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDeleted {
    pub id: Uuid,
}

#[derive(Debug, Error)]
pub enum OrderError {
    /// The update arrived before the order was created; redelivery may fix it.
    #[error("order {0} not found")]
    NotFound(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSummary {
    pub customer_id: Uuid,
    pub total_cents: i64,
    pub status: OrderStatus,
    pub updated_at: DateTime<Utc>,
}

/// Current state of every known order.
#[derive(Debug, Clone, Default)]
pub struct OrderProjection {
    orders: Arc<RwLock<HashMap<Uuid, OrderSummary>>>,
}

impl OrderProjection {
    pub async fn get(&self, id: Uuid) -> Option<OrderSummary> {
        self.orders.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }

    async fn created(&self, event: &OrderCreated) {
        self.orders.write().await.insert(
            event.id,
            OrderSummary {
                customer_id: event.customer_id,
                total_cents: event.total_cents,
                status: OrderStatus::Pending,
                updated_at: event.created_at,
            },
        );
    }

    async fn updated(&self, event: &OrderUpdated) -> Result<(), OrderError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&event.id)
            .ok_or(OrderError::NotFound(event.id))?;

        // Redeliveries can arrive after newer updates.
        if event.updated_at >= order.updated_at {
            order.status = event.status;
            order.updated_at = event.updated_at;
        }
        Ok(())
    }

    async fn deleted(&self, event: &OrderDeleted) -> bool {
        self.orders.write().await.remove(&event.id).is_some()
    }
}

pub struct OrderCreatedHandler {
    projection: OrderProjection,
}

#[async_trait]
impl<M: InboundMessage> SubjectHandler<M> for OrderCreatedHandler {
    async fn handle(&self, message: &M) -> HandlerResult {
        let event = message
            .json::<OrderCreated>()
            .wrap_err("invalid order created payload")?;

        self.projection.created(&event).await;

        info!(
            order_id = %event.id,
            customer_id = %event.customer_id,
            total_cents = event.total_cents,
            "Order created"
        );
        Ok(())
    }
}

pub struct OrderUpdatedHandler {
    projection: OrderProjection,
}

#[async_trait]
impl<M: InboundMessage> SubjectHandler<M> for OrderUpdatedHandler {
    async fn handle(&self, message: &M) -> HandlerResult {
        let event = message
            .json::<OrderUpdated>()
            .wrap_err("invalid order updated payload")?;

        self.projection.updated(&event).await?;

        info!(order_id = %event.id, status = %event.status, "Order updated");
        Ok(())
    }
}

pub struct OrderDeletedHandler {
    projection: OrderProjection,
}

#[async_trait]
impl<M: InboundMessage> SubjectHandler<M> for OrderDeletedHandler {
    async fn handle(&self, message: &M) -> HandlerResult {
        let event = message
            .json::<OrderDeleted>()
            .wrap_err("invalid order deleted payload")?;

        if self.projection.deleted(&event).await {
            info!(order_id = %event.id, "Order deleted");
        } else {
            debug!(order_id = %event.id, "Order already deleted");
        }
        Ok(())
    }
}

/// Route every order subject to its handler.
pub fn router<M: InboundMessage>(
    projection: &OrderProjection,
) -> Result<SubjectRouter<M>, ConfigError> {
    SubjectRouter::builder()
        .route(
            ["orders.created"],
            OrderCreatedHandler {
                projection: projection.clone(),
            },
        )
        .route(
            ["orders.updated"],
            OrderUpdatedHandler {
                projection: projection.clone(),
            },
        )
        .route(
            ["orders.deleted"],
            OrderDeletedHandler {
                projection: projection.clone(),
            },
        )
        .build()
}

pub struct OrdersConsumer<M: InboundMessage> {
    router: SubjectRouter<M>,
    dead_letters: Arc<dyn DeadLetters>,
}

impl<M: InboundMessage> OrdersConsumer<M> {
    pub fn new(
        projection: &OrderProjection,
        dead_letters: Arc<dyn DeadLetters>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            router: router(projection)?,
            dead_letters,
        })
    }

    pub fn router(&self) -> &SubjectRouter<M> {
        &self.router
    }
}

#[async_trait]
impl<M: InboundMessage> MessageConsumer<M> for OrdersConsumer<M> {
    async fn handle_message(&self, message: &M) -> HandlerResult {
        self.router.handle(message).await
    }

    async fn handle_error(&self, message: &M, error: &HandlerError, attempt: u64) -> HandlerResult {
        let entry = DeadLetterEntry::new(message, error, attempt);
        let sequence = self
            .dead_letters
            .publish(&entry)
            .await
            .wrap_err("failed to publish dead letter")?;

        message.ack().await?;

        warn!(
            subject = %message.subject(),
            attempt,
            dead_letter_sequence = sequence,
            "Order event moved to dead letters"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumers::MockDeadLetters;
    use messaging::testing::TestMessage;
    use messaging::{ConsumerConfig, ConsumerRuntime, Outcome};
    use nats_consumer::NatsError;
    use serde_json::json;

    fn order_id() -> Uuid {
        Uuid::parse_str("6f1c2a8e-4b7d-4e39-9a52-0d8e3f7b1c64").unwrap()
    }

    fn created() -> TestMessage {
        TestMessage::new("orders.created").with_payload(
            json!({
                "id": order_id(),
                "customer_id": "0b5e1f7a-9c3d-4a28-8e61-2f4d6c8b0a13",
                "total_cents": 4250,
                "created_at": "2026-10-01T12:00:00Z"
            })
            .to_string(),
        )
    }

    fn updated(status: &str, at: &str) -> TestMessage {
        TestMessage::new("orders.updated").with_payload(
            json!({ "id": order_id(), "status": status, "updated_at": at }).to_string(),
        )
    }

    fn consumer(dead_letters: MockDeadLetters) -> (OrderProjection, OrdersConsumer<TestMessage>) {
        let projection = OrderProjection::default();
        let consumer = OrdersConsumer::new(&projection, Arc::new(dead_letters)).unwrap();
        (projection, consumer)
    }

    #[test]
    fn test_consumer_def() {
        let config = ConsumerConfig::from_def::<OrdersConsumerDef>().unwrap();

        assert_eq!(config.stream_name(), "ORDERS");
        assert_eq!(config.filter_subject(), "orders.>");
        assert_eq!(config.durable_name(), "orders-consumer");
        assert_eq!(config.error_ack_behavior(), ErrorAckBehavior::Delegated);
    }

    #[test]
    fn test_router_covers_every_subject() {
        let router = router::<TestMessage>(&OrderProjection::default()).unwrap();

        assert!(router.report().is_clean());
        assert_eq!(
            router.handler_ids().iter().map(|id| id.as_str()).collect::<Vec<_>>(),
            vec!["created", "updated", "deleted"]
        );
    }

    #[tokio::test]
    async fn test_order_lifecycle() {
        let (projection, consumer) = consumer(MockDeadLetters::new());

        consumer.handle_message(&created()).await.unwrap();
        let order = projection.get(order_id()).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_cents, 4250);

        consumer
            .handle_message(&updated("paid", "2026-10-01T12:05:00Z"))
            .await
            .unwrap();
        assert_eq!(
            projection.get(order_id()).await.unwrap().status,
            OrderStatus::Paid
        );

        let deleted = TestMessage::new("orders.deleted")
            .with_payload(json!({ "id": order_id() }).to_string());
        consumer.handle_message(&deleted).await.unwrap();
        consumer.handle_message(&deleted).await.unwrap();
        assert!(projection.is_empty().await);
    }

    #[tokio::test]
    async fn test_stale_update_is_ignored() {
        let (projection, consumer) = consumer(MockDeadLetters::new());
        consumer.handle_message(&created()).await.unwrap();

        consumer
            .handle_message(&updated("shipped", "2026-10-02T09:00:00Z"))
            .await
            .unwrap();
        consumer
            .handle_message(&updated("paid", "2026-10-01T12:05:00Z"))
            .await
            .unwrap();

        assert_eq!(
            projection.get(order_id()).await.unwrap().status,
            OrderStatus::Shipped
        );
    }

    #[tokio::test]
    async fn test_update_before_create_fails() {
        let (_projection, consumer) = consumer(MockDeadLetters::new());

        let err = consumer
            .handle_message(&updated("paid", "2026-10-01T12:05:00Z"))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<OrderError>(),
            Some(OrderError::NotFound(id)) if *id == order_id()
        ));
    }

    #[tokio::test]
    async fn test_invalid_payload_fails() {
        let (_projection, consumer) = consumer(MockDeadLetters::new());
        let msg = TestMessage::new("orders.created").with_payload("not json");

        let err = consumer.handle_message(&msg).await.unwrap_err();
        assert!(err.to_string().contains("invalid order created payload"));
    }

    #[tokio::test]
    async fn test_final_failure_moves_to_dead_letters() {
        let mut dead_letters = MockDeadLetters::new();
        dead_letters
            .expect_publish()
            .withf(|entry| entry.subject == "orders.updated" && entry.attempt == 5)
            .times(1)
            .returning(|_| Ok(7));
        let (_projection, consumer) = consumer(dead_letters);

        let config = ConsumerConfig::from_def::<OrdersConsumerDef>().unwrap();
        let runtime = ConsumerRuntime::new(config, consumer);

        let retry = updated("paid", "2026-10-01T12:05:00Z").with_delivered(4);
        assert_eq!(runtime.process_message(&retry).await.unwrap(), Outcome::Retrying);
        assert_eq!(retry.nak_count(), 1);

        let last = updated("paid", "2026-10-01T12:05:00Z").with_delivered(5);
        let outcome = runtime.process_message(&last).await.unwrap();

        assert_eq!(outcome, Outcome::Terminal(ErrorAckBehavior::Delegated));
        assert_eq!(last.ack_count(), 1);
        assert_eq!(last.nak_count(), 0);
        assert_eq!(runtime.stats().total_error_count, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_failure_leaves_message_unacked() {
        let mut dead_letters = MockDeadLetters::new();
        dead_letters
            .expect_publish()
            .times(1)
            .returning(|_| Err(NatsError::Publish("no responders".to_string())));
        let (_projection, consumer) = consumer(dead_letters);

        let msg = updated("paid", "2026-10-01T12:05:00Z").with_delivered(5);
        let error = eyre::eyre!("order not found");

        let err = consumer.handle_error(&msg, &error, 5).await.unwrap_err();

        assert!(err.to_string().contains("failed to publish dead letter"));
        assert_eq!(msg.ack_count(), 0);
    }
}
