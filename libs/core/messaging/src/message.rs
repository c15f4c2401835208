//! Inbound message abstraction.

use crate::error::AckError;
use async_trait::async_trait;

/// Broker-supplied delivery metadata.
///
/// `delivered` is the broker's redelivery counter for this message on this
/// durable. It is always read from the broker; the runtime never computes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryMetadata {
    /// Sequence of the message in the stream.
    pub stream_sequence: u64,
    /// Sequence of the delivery on the consumer.
    pub consumer_sequence: u64,
    /// Delivery attempt, starting at 1.
    pub delivered: u64,
    /// Messages still pending on the consumer when this one was delivered.
    pub pending: u64,
}

impl DeliveryMetadata {
    /// Whether this delivery is a redelivery.
    pub fn is_redelivery(&self) -> bool {
        self.delivered > 1
    }
}

/// A message delivered by the broker.
///
/// The first `ack` or `nak` settles the delivery; later calls send nothing
/// and return `Ok`. A settle call that fails leaves the delivery unsettled.
#[async_trait]
pub trait InboundMessage: Send + Sync + 'static {
    /// Subject the message was published on.
    fn subject(&self) -> &str;

    /// Raw payload.
    fn payload(&self) -> &[u8];

    /// Delivery metadata reported by the broker.
    fn metadata(&self) -> DeliveryMetadata;

    /// Acknowledge successful processing.
    async fn ack(&self) -> Result<(), AckError>;

    /// Request redelivery.
    async fn nak(&self) -> Result<(), AckError>;

    /// Whether an ack or nak has already been sent.
    fn is_settled(&self) -> bool;

    /// Deserialize the payload as JSON.
    fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error>
    where
        Self: Sized,
    {
        serde_json::from_slice(self.payload())
    }
}
