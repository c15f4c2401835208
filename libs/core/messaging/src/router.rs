//! Subject-based message router.
//!
//! The router maps exact subjects to handler identifiers (see
//! [`HandlerId::for_subject`]) and identifiers to typed handlers. The table is
//! built once by [`SubjectRouterBuilder`] and never changes afterwards.
//!
//! # Example
//!
//! ```rust,ignore
//! let router = SubjectRouter::builder()
//!     .route(["orders.created"], CreatedHandler::new(db.clone()))
//!     .route(["orders.updated", "orders-updated"], UpdatedHandler)
//!     .subject("orders.archived") // no handler yet: falls back with not_implemented
//!     .build()?;
//!
//! router.handle(&message).await?;
//! ```

use crate::error::{ConfigError, FallbackReason, HandlerResult};
use crate::message::InboundMessage;
use crate::subject::{self, HandlerId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Handler for the messages of one or more subjects.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubjectHandler<M: InboundMessage>: Send + Sync {
    /// Handle a message. Errors are returned to the caller unchanged.
    async fn handle(&self, message: &M) -> HandlerResult;
}

#[async_trait]
impl<M, H> SubjectHandler<M> for Arc<H>
where
    M: InboundMessage,
    H: SubjectHandler<M> + ?Sized,
{
    async fn handle(&self, message: &M) -> HandlerResult {
        (**self).handle(message).await
    }
}

/// Catch-all for messages the router cannot resolve to a handler.
#[async_trait]
pub trait Fallback<M: InboundMessage>: Send + Sync {
    async fn fallback(&self, message: &M, reason: FallbackReason) -> HandlerResult;
}

/// Default fallback: nak the message so the broker redelivers it.
///
/// Keeps unroutable messages in the stream until a handler is deployed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NakFallback;

#[async_trait]
impl<M: InboundMessage> Fallback<M> for NakFallback {
    async fn fallback(&self, message: &M, reason: FallbackReason) -> HandlerResult {
        warn!(
            subject = %message.subject(),
            reason = %reason,
            "Fallback triggered, nak-ing message for redelivery"
        );
        message.nak().await?;
        Ok(())
    }
}

/// Two subjects that derive the same handler identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub handler_id: HandlerId,
    pub first_subject: String,
    pub subject: String,
}

/// Startup self-check of a routing table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterReport {
    /// Handler ids some subject routes to but no handler implements.
    pub missing_handlers: Vec<HandlerId>,
    pub collisions: Vec<Collision>,
}

impl RouterReport {
    /// Whether every subject routes to an implemented, unshared handler id.
    pub fn is_clean(&self) -> bool {
        self.missing_handlers.is_empty() && self.collisions.is_empty()
    }

    /// Log a warning for every missing handler and every collision.
    pub fn log(&self) {
        for id in &self.missing_handlers {
            warn!(
                handler = %id,
                "No handler implemented; messages for this id will hit the fallback"
            );
        }
        for collision in &self.collisions {
            warn!(
                handler = %collision.handler_id,
                first_subject = %collision.first_subject,
                subject = %collision.subject,
                "Subjects share a handler id"
            );
        }
        if self.is_clean() {
            debug!("Routing table complete");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Route {
    subject: String,
    handler_id: HandlerId,
}

/// Routes messages to handlers by subject.
pub struct SubjectRouter<M: InboundMessage> {
    subjects: Vec<String>,
    routes: Vec<Route>,
    index: HashMap<String, usize>,
    handlers: HashMap<HandlerId, Arc<dyn SubjectHandler<M>>>,
    collisions: Vec<Collision>,
    fallback: Arc<dyn Fallback<M>>,
}

impl<M: InboundMessage> SubjectRouter<M> {
    /// Start building a router.
    pub fn builder() -> SubjectRouterBuilder<M> {
        SubjectRouterBuilder::default()
    }

    /// Dispatch a message to the handler registered for its subject.
    ///
    /// Routing failures go to the fallback. Handler errors are returned
    /// unchanged and never reach the fallback. The router never acks.
    pub async fn handle(&self, message: &M) -> HandlerResult {
        let subject = message.subject();

        let Some(&position) = self.index.get(subject) else {
            let reason = if self.subjects.iter().any(|s| s == subject) {
                warn!(subject = %subject, "No handler mapping for subject");
                FallbackReason::NoMapping
            } else {
                warn!(subject = %subject, "Received message for unhandled subject");
                FallbackReason::UnhandledSubject
            };
            return self.fallback.fallback(message, reason).await;
        };

        let handler_id = &self.routes[position].handler_id;
        let Some(handler) = self.handlers.get(handler_id) else {
            error!(
                subject = %subject,
                handler = %handler_id,
                "Handler not implemented for subject"
            );
            return self
                .fallback
                .fallback(message, FallbackReason::NotImplemented)
                .await;
        };

        let result = handler.handle(message).await;
        if let Err(e) = &result {
            debug!(
                subject = %subject,
                handler = %handler_id,
                error = %e,
                "Handler returned an error"
            );
        }
        result
    }

    /// All registered subjects, wildcards included, in registration order.
    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    /// Routable subjects and the handler id each one resolves to.
    pub fn routes(&self) -> impl Iterator<Item = (&str, &HandlerId)> {
        self.routes
            .iter()
            .map(|route| (route.subject.as_str(), &route.handler_id))
    }

    /// Handler id for an exact subject, if it is routable.
    pub fn handler_id_for(&self, subject: &str) -> Option<&HandlerId> {
        self.index
            .get(subject)
            .map(|&position| &self.routes[position].handler_id)
    }

    /// Expected handler ids, one per routable subject.
    pub fn handler_ids(&self) -> Vec<&HandlerId> {
        self.routes.iter().map(|route| &route.handler_id).collect()
    }

    /// Handler ids that some subject routes to but no handler implements.
    pub fn missing_handlers(&self) -> Vec<&HandlerId> {
        let mut missing: Vec<&HandlerId> = Vec::new();
        for route in &self.routes {
            if !self.handlers.contains_key(&route.handler_id) && !missing.contains(&&route.handler_id)
            {
                missing.push(&route.handler_id);
            }
        }
        missing
    }

    /// Subjects that derived an already-taken handler id.
    pub fn collisions(&self) -> &[Collision] {
        &self.collisions
    }

    /// Missing handlers and collisions, for logging at startup.
    pub fn report(&self) -> RouterReport {
        RouterReport {
            missing_handlers: self.missing_handlers().into_iter().cloned().collect(),
            collisions: self.collisions.clone(),
        }
    }
}

impl<M: InboundMessage> fmt::Debug for SubjectRouter<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectRouter")
            .field("routes", &self.routes)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("collisions", &self.collisions)
            .finish()
    }
}

/// Declarative builder for [`SubjectRouter`].
pub struct SubjectRouterBuilder<M: InboundMessage> {
    subjects: Vec<String>,
    handlers: Vec<(HandlerId, Arc<dyn SubjectHandler<M>>)>,
    fallback: Option<Arc<dyn Fallback<M>>>,
}

impl<M: InboundMessage> Default for SubjectRouterBuilder<M> {
    fn default() -> Self {
        Self {
            subjects: Vec::new(),
            handlers: Vec::new(),
            fallback: None,
        }
    }
}

impl<M: InboundMessage> SubjectRouterBuilder<M> {
    /// Register a subject without binding a handler.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subjects.push(subject.into());
        self
    }

    /// Register several subjects without binding handlers.
    pub fn subjects<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subjects.extend(subjects.into_iter().map(Into::into));
        self
    }

    /// Bind a handler to a handler id. A later binding for the same id wins.
    pub fn handler<H>(mut self, id: impl Into<HandlerId>, handler: H) -> Self
    where
        H: SubjectHandler<M> + 'static,
    {
        let handler: Arc<dyn SubjectHandler<M>> = Arc::new(handler);
        self.handlers.push((id.into(), handler));
        self
    }

    /// Register subjects and bind one handler to the id each of them derives.
    pub fn route<I, S, H>(mut self, subjects: I, handler: H) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        H: SubjectHandler<M> + 'static,
    {
        let handler: Arc<dyn SubjectHandler<M>> = Arc::new(handler);
        for subject in subjects {
            let subject = subject.into();
            if let Some(id) = HandlerId::for_subject(&subject) {
                self.handlers.push((id, handler.clone()));
            }
            self.subjects.push(subject);
        }
        self
    }

    /// Replace the default [`NakFallback`].
    pub fn fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fallback<M> + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// Build the routing table.
    pub fn build(self) -> Result<SubjectRouter<M>, ConfigError> {
        if self.subjects.is_empty() {
            return Err(ConfigError::EmptySubjects);
        }

        let mut subjects: Vec<String> = Vec::with_capacity(self.subjects.len());
        let mut routes: Vec<Route> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut owners: HashMap<HandlerId, String> = HashMap::new();
        let mut collisions = Vec::new();

        for subject in self.subjects {
            subject::validate_subject(&subject)?;
            if subjects.contains(&subject) {
                continue;
            }
            subjects.push(subject.clone());

            let Some(handler_id) = HandlerId::for_subject(&subject) else {
                debug!(subject = %subject, "Skipping wildcard subject");
                continue;
            };

            match owners.get(&handler_id) {
                Some(first_subject) => {
                    warn!(
                        subject = %subject,
                        first_subject = %first_subject,
                        handler = %handler_id,
                        "Handler id collision: both subjects route to the same handler; prefer dot notation"
                    );
                    collisions.push(Collision {
                        handler_id: handler_id.clone(),
                        first_subject: first_subject.clone(),
                        subject: subject.clone(),
                    });
                }
                None => {
                    owners.insert(handler_id.clone(), subject.clone());
                }
            }

            index.insert(subject.clone(), routes.len());
            routes.push(Route {
                subject,
                handler_id,
            });
        }

        let mut handlers: HashMap<HandlerId, Arc<dyn SubjectHandler<M>>> = HashMap::new();
        for (id, handler) in self.handlers {
            if !owners.contains_key(&id) {
                warn!(handler = %id, "Handler bound to an id no subject routes to");
            }
            if let Some(previous) = handlers.insert(id.clone(), handler.clone()) {
                if !Arc::ptr_eq(&previous, &handler) {
                    warn!(handler = %id, "Handler registered twice, keeping the last one");
                }
            }
        }

        let legacy: Vec<&str> = subjects
            .iter()
            .map(String::as_str)
            .filter(|s| !subject::is_wildcard(s) && !subject::uses_dot_notation(s))
            .collect();
        if !legacy.is_empty() {
            info!(
                subjects = ?legacy,
                "Consider dot notation for subjects, e.g. 'orders.created' instead of 'orders-created'"
            );
        }

        Ok(SubjectRouter {
            subjects,
            routes,
            index,
            handlers,
            collisions,
            fallback: self
                .fallback
                .unwrap_or_else(|| Arc::new(NakFallback) as Arc<dyn Fallback<M>>),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestMessage;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SubjectHandler<TestMessage> for Recorder {
        async fn handle(&self, message: &TestMessage) -> HandlerResult {
            self.calls
                .lock()
                .unwrap()
                .push(message.subject().to_string());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingFallback {
        reasons: Arc<Mutex<Vec<FallbackReason>>>,
    }

    #[async_trait]
    impl Fallback<TestMessage> for RecordingFallback {
        async fn fallback(&self, _message: &TestMessage, reason: FallbackReason) -> HandlerResult {
            self.reasons.lock().unwrap().push(reason);
            Ok(())
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("inventory unavailable")]
    struct InventoryUnavailable;

    fn standard_subjects() -> Vec<&'static str> {
        vec![
            "orders.created",
            "orders-updated",
            "orders_deleted",
            "payments",
            "orders.old.archived",
            "orders.*",
            "users.>",
        ]
    }

    #[test]
    fn test_mapping_for_all_notations() {
        let router = SubjectRouter::<TestMessage>::builder()
            .subjects(standard_subjects())
            .build()
            .unwrap();

        let routes: Vec<(&str, &str)> = router.routes().map(|(s, id)| (s, id.as_str())).collect();
        assert_eq!(
            routes,
            vec![
                ("orders.created", "created"),
                ("orders-updated", "updated"),
                ("orders_deleted", "deleted"),
                ("payments", "payments"),
                ("orders.old.archived", "old_archived"),
            ]
        );
    }

    #[test]
    fn test_wildcards_never_keys() {
        let router = SubjectRouter::<TestMessage>::builder()
            .subjects(standard_subjects())
            .build()
            .unwrap();

        assert!(router.routes().all(|(s, _)| !s.contains('*') && !s.contains('>')));
        assert!(router.handler_id_for("orders.*").is_none());
        assert!(router.handler_id_for("users.>").is_none());
        assert_eq!(router.subjects().len(), 7);
    }

    #[test]
    fn test_rebuild_is_identical() {
        let build = || {
            SubjectRouter::<TestMessage>::builder()
                .subjects(standard_subjects())
                .build()
                .unwrap()
        };
        let first = build();
        let second = build();

        let first: Vec<_> = first.routes().map(|(s, id)| (s.to_string(), id.clone())).collect();
        let second: Vec<_> = second.routes().map(|(s, id)| (s.to_string(), id.clone())).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_subjects_rejected() {
        let result = SubjectRouter::<TestMessage>::builder().build();
        assert_eq!(result.unwrap_err(), ConfigError::EmptySubjects);
    }

    #[test]
    fn test_subjects_with_empty_tokens_rejected() {
        for bad in ["orders.", "orders..created", ".created"] {
            let result = SubjectRouter::<TestMessage>::builder()
                .route(["orders.created", bad], Recorder::default())
                .build();
            assert_eq!(
                result.unwrap_err(),
                ConfigError::InvalidSubject(bad.to_string()),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_missing_handlers() {
        let router = SubjectRouter::<TestMessage>::builder()
            .route(["orders.created"], Recorder::default())
            .subjects(["orders.updated", "orders-updated", "payments"])
            .build()
            .unwrap();

        let missing: Vec<&str> = router.missing_handlers().into_iter().map(HandlerId::as_str).collect();
        assert_eq!(missing, vec!["updated", "payments"]);
        assert_eq!(
            router.handler_ids().into_iter().map(HandlerId::as_str).collect::<Vec<_>>(),
            vec!["created", "updated", "updated", "payments"]
        );
    }

    #[test]
    fn test_report_lists_unimplemented_subjects_and_collisions() {
        let router = SubjectRouter::<TestMessage>::builder()
            .route(["orders.created"], Recorder::default())
            .subjects(["orders.archived", "orders-created"])
            .build()
            .unwrap();

        let report = router.report();

        assert!(!report.is_clean());
        assert_eq!(report.missing_handlers, vec![HandlerId::new("archived")]);
        assert_eq!(report.collisions.len(), 1);
        assert_eq!(report.collisions[0].subject, "orders-created");
        report.log();
    }

    #[test]
    fn test_report_clean_router() {
        let router = SubjectRouter::<TestMessage>::builder()
            .route(["orders.created", "orders.deleted"], Recorder::default())
            .build()
            .unwrap();

        assert_eq!(router.report(), RouterReport::default());
        assert!(router.report().is_clean());
    }

    #[tokio::test]
    async fn test_routes_to_registered_handler_once() {
        let mut created = MockSubjectHandler::<TestMessage>::new();
        created.expect_handle().times(1).returning(|_| Ok(()));
        let mut payments = MockSubjectHandler::<TestMessage>::new();
        payments.expect_handle().never();

        let router = SubjectRouter::builder()
            .route(["orders.created"], created)
            .route(["payments"], payments)
            .build()
            .unwrap();

        let msg = TestMessage::new("orders.created");
        router.handle(&msg).await.unwrap();

        assert_eq!(msg.ack_count(), 0, "router must not ack");
        assert_eq!(msg.nak_count(), 0);
    }

    #[tokio::test]
    async fn test_routes_every_notation() {
        let recorder = Recorder::default();
        let router = SubjectRouter::builder()
            .subjects(standard_subjects())
            .handler("created", recorder.clone())
            .handler("updated", recorder.clone())
            .handler("deleted", recorder.clone())
            .handler("payments", recorder.clone())
            .handler("old_archived", recorder.clone())
            .build()
            .unwrap();

        for subject in ["orders.created", "orders-updated", "orders_deleted", "payments", "orders.old.archived"] {
            router.handle(&TestMessage::new(subject)).await.unwrap();
        }

        assert_eq!(
            recorder.calls(),
            vec!["orders.created", "orders-updated", "orders_deleted", "payments", "orders.old.archived"]
        );
        assert!(router.missing_handlers().is_empty());
    }

    #[tokio::test]
    async fn test_unhandled_subject_naks_once() {
        let router = SubjectRouter::builder()
            .route(["orders.created"], Recorder::default())
            .build()
            .unwrap();

        let msg = TestMessage::new("unknown.subject");
        router.handle(&msg).await.unwrap();

        assert_eq!(msg.nak_count(), 1);
        assert_eq!(msg.ack_count(), 0);
    }

    #[tokio::test]
    async fn test_fallback_reasons() {
        let fallback = RecordingFallback::default();
        let router = SubjectRouter::builder()
            .route(["orders.created"], Recorder::default())
            .subjects(["orders.updated", "orders.*"])
            .fallback(fallback.clone())
            .build()
            .unwrap();

        router.handle(&TestMessage::new("unknown.subject")).await.unwrap();
        router.handle(&TestMessage::new("orders.updated")).await.unwrap();
        router.handle(&TestMessage::new("orders.*")).await.unwrap();
        router.handle(&TestMessage::new("orders.created")).await.unwrap();

        assert_eq!(
            *fallback.reasons.lock().unwrap(),
            vec![
                FallbackReason::UnhandledSubject,
                FallbackReason::NotImplemented,
                FallbackReason::NoMapping,
            ]
        );
    }

    #[tokio::test]
    async fn test_handler_error_propagates_without_fallback() {
        let mut failing = MockSubjectHandler::<TestMessage>::new();
        failing
            .expect_handle()
            .times(1)
            .returning(|_| Err(eyre::Report::new(InventoryUnavailable)));

        let fallback = RecordingFallback::default();
        let router = SubjectRouter::builder()
            .route(["orders.created"], failing)
            .fallback(fallback.clone())
            .build()
            .unwrap();

        let msg = TestMessage::new("orders.created");
        let err = router.handle(&msg).await.unwrap_err();

        assert!(err.downcast_ref::<InventoryUnavailable>().is_some());
        assert!(fallback.reasons.lock().unwrap().is_empty());
        assert_eq!(msg.nak_count(), 0);
        assert_eq!(msg.ack_count(), 0);
    }

    #[tokio::test]
    async fn test_colliding_subjects_both_route() {
        let recorder = Recorder::default();
        let router = SubjectRouter::builder()
            .route(["orders-updated", "orders.updated"], recorder.clone())
            .build()
            .unwrap();

        assert_eq!(
            router.collisions(),
            &[Collision {
                handler_id: HandlerId::new("updated"),
                first_subject: "orders-updated".to_string(),
                subject: "orders.updated".to_string(),
            }]
        );

        router.handle(&TestMessage::new("orders-updated")).await.unwrap();
        router.handle(&TestMessage::new("orders.updated")).await.unwrap();
        assert_eq!(recorder.calls(), vec!["orders-updated", "orders.updated"]);
    }

    #[tokio::test]
    async fn test_last_registered_handler_wins() {
        let first = Recorder::default();
        let second = Recorder::default();
        let router = SubjectRouter::builder()
            .subject("orders.created")
            .handler("created", first.clone())
            .handler("created", second.clone())
            .build()
            .unwrap();

        router.handle(&TestMessage::new("orders.created")).await.unwrap();
        assert!(first.calls().is_empty());
        assert_eq!(second.calls(), vec!["orders.created"]);
    }

    #[tokio::test]
    async fn test_duplicate_subject_registered_once() {
        let recorder = Recorder::default();
        let router = SubjectRouter::builder()
            .route(["orders.created", "orders.created"], recorder.clone())
            .build()
            .unwrap();

        assert_eq!(router.routes().count(), 1);
        assert!(router.collisions().is_empty());
        router.handle(&TestMessage::new("orders.created")).await.unwrap();
        assert_eq!(recorder.calls().len(), 1);
    }
}
