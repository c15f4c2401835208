//! Worker loop: pulls deliveries off a subscription and runs each one in its
//! own task.
//!
//! A slow handler never blocks later deliveries. The number of deliveries
//! being processed at once is bounded by `max_in_flight`.

use crate::consumer::MessageConsumer;
use crate::error::ConsumerError;
use crate::message::InboundMessage;
use crate::runtime::{ConsumerRuntime, Outcome};
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Runs a [`ConsumerRuntime`] against a stream of deliveries.
pub struct Worker<M, C> {
    runtime: Arc<ConsumerRuntime<M, C>>,
}

impl<M, C> Clone for Worker<M, C> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
        }
    }
}

impl<M, C> Worker<M, C>
where
    M: InboundMessage,
    C: MessageConsumer<M> + 'static,
{
    pub fn new(runtime: Arc<ConsumerRuntime<M, C>>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<ConsumerRuntime<M, C>> {
        &self.runtime
    }

    /// Process deliveries until shutdown is signalled or the stream ends.
    ///
    /// Errors yielded by the stream are logged and skipped. On shutdown no
    /// new deliveries are taken and in-flight ones are awaited. A stream that
    /// ends on its own is reported as [`ConsumerError::Subscription`] once
    /// in-flight deliveries have finished.
    pub async fn run<S, E>(
        &self,
        messages: S,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), ConsumerError>
    where
        S: Stream<Item = Result<M, E>>,
        E: Display,
    {
        let config = self.runtime.config();
        info!(
            stream = %config.stream_name(),
            durable = %config.durable_name(),
            max_in_flight = config.max_in_flight(),
            "Starting consumer worker"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_in_flight()));
        let mut tasks: JoinSet<Result<Outcome, ConsumerError>> = JoinSet::new();
        let mut messages = std::pin::pin!(messages);
        let mut result = Ok(());

        if *shutdown_rx.borrow() {
            info!("Shutdown already requested, not consuming");
            return Ok(());
        }

        loop {
            while let Some(finished) = tasks.try_join_next() {
                log_task_result(finished);
            }

            let permit = tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping worker");
                        break;
                    }
                    continue;
                }

                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping worker");
                        break;
                    }
                    continue;
                }

                next = messages.next() => next,
            };

            match next {
                Some(Ok(message)) => {
                    let runtime = self.runtime.clone();
                    tasks.spawn(async move {
                        let outcome = runtime.process_message(&message).await;
                        drop(permit);
                        outcome
                    });
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Failed to receive message");
                }
                None => {
                    warn!("Message stream ended");
                    result = Err(ConsumerError::Subscription(
                        "message stream ended".to_string(),
                    ));
                    break;
                }
            }
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Waiting for in-flight messages");
        }
        while let Some(finished) = tasks.join_next().await {
            log_task_result(finished);
        }

        let stats = self.runtime.stats();
        info!(
            total_success_count = stats.total_success_count,
            total_error_count = stats.total_error_count,
            "Consumer worker stopped"
        );
        result
    }
}

fn log_task_result(result: Result<Result<Outcome, ConsumerError>, JoinError>) {
    match result {
        Ok(Ok(outcome)) => debug!(?outcome, "Message settled"),
        Ok(Err(e)) => error!(error = %e, "Failed to process message"),
        Err(e) => error!(error = %e, "Message task panicked"),
    }
}
