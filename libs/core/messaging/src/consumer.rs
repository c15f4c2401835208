//! Consumer trait: the application side of the runtime.

use crate::error::{HandlerError, HandlerResult};
use crate::message::InboundMessage;
use crate::router::SubjectRouter;
use async_trait::async_trait;
use std::sync::Arc;

/// Application logic driven by [`ConsumerRuntime`](crate::ConsumerRuntime).
///
/// # Example
///
/// ```rust,ignore
/// struct OrderConsumer {
///     router: SubjectRouter<JetStreamMessage>,
///     dead_letters: DeadLetterPublisher,
/// }
///
/// #[async_trait]
/// impl MessageConsumer<JetStreamMessage> for OrderConsumer {
///     async fn handle_message(&self, message: &JetStreamMessage) -> HandlerResult {
///         self.router.handle(message).await
///     }
///
///     async fn handle_error(
///         &self,
///         message: &JetStreamMessage,
///         error: &HandlerError,
///         attempt: u64,
///     ) -> HandlerResult {
///         self.dead_letters.publish(message, error, attempt).await?;
///         message.ack().await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait MessageConsumer<M: InboundMessage>: Send + Sync {
    /// Process one message. An error means the delivery failed.
    async fn handle_message(&self, message: &M) -> HandlerResult;

    /// Called once when a delivery fails on its final allowed attempt,
    /// before the terminal ack policy is applied.
    ///
    /// Errors returned here are propagated by the runtime.
    async fn handle_error(
        &self,
        _message: &M,
        _error: &HandlerError,
        _attempt: u64,
    ) -> HandlerResult {
        Ok(())
    }
}

#[async_trait]
impl<M: InboundMessage> MessageConsumer<M> for SubjectRouter<M> {
    async fn handle_message(&self, message: &M) -> HandlerResult {
        self.handle(message).await
    }
}

#[async_trait]
impl<M, C> MessageConsumer<M> for Arc<C>
where
    M: InboundMessage,
    C: MessageConsumer<M> + ?Sized,
{
    async fn handle_message(&self, message: &M) -> HandlerResult {
        (**self).handle_message(message).await
    }

    async fn handle_error(&self, message: &M, error: &HandlerError, attempt: u64) -> HandlerResult {
        (**self).handle_error(message, error, attempt).await
    }
}
