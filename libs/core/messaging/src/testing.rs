//! In-memory message for tests.

use crate::error::{AckError, AckKind};
use crate::message::{DeliveryMetadata, InboundMessage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A message that records how often it was acked and nak'ed.
///
/// Like a broker message, only the first ack or nak is sent; the counters
/// record what reached the "broker". Clones share their counters, so a test can keep a handle while the
/// original is moved into the runtime.
#[derive(Debug, Clone)]
pub struct TestMessage {
    subject: String,
    payload: Vec<u8>,
    metadata: DeliveryMetadata,
    acks: Arc<AtomicUsize>,
    naks: Arc<AtomicUsize>,
    settled: Arc<AtomicBool>,
    fail_acks: bool,
}

impl TestMessage {
    /// Create a first-delivery message on `subject` with an empty payload.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            payload: Vec::new(),
            metadata: DeliveryMetadata {
                stream_sequence: 1,
                consumer_sequence: 1,
                delivered: 1,
                pending: 0,
            },
            acks: Arc::new(AtomicUsize::new(0)),
            naks: Arc::new(AtomicUsize::new(0)),
            settled: Arc::new(AtomicBool::new(false)),
            fail_acks: false,
        }
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Set the broker-reported delivery attempt.
    pub fn with_delivered(mut self, delivered: u64) -> Self {
        self.metadata.delivered = delivered;
        self
    }

    /// Set the stream sequence.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.metadata.stream_sequence = sequence;
        self.metadata.consumer_sequence = sequence;
        self
    }

    /// Make every ack and nak fail as if the connection were gone.
    pub fn failing_acks(mut self) -> Self {
        self.fail_acks = true;
        self
    }

    /// Number of acks sent.
    pub fn ack_count(&self) -> usize {
        self.acks.load(Ordering::SeqCst)
    }

    /// Number of naks sent.
    pub fn nak_count(&self) -> usize {
        self.naks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InboundMessage for TestMessage {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn metadata(&self) -> DeliveryMetadata {
        self.metadata
    }

    async fn ack(&self) -> Result<(), AckError> {
        self.settle(AckKind::Ack, &self.acks)
    }

    async fn nak(&self) -> Result<(), AckError> {
        self.settle(AckKind::Nak, &self.naks)
    }

    fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }
}

impl TestMessage {
    fn settle(&self, kind: AckKind, sent: &AtomicUsize) -> Result<(), AckError> {
        if self.fail_acks {
            return Err(AckError::new(kind, "connection closed"));
        }
        if self.settled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
