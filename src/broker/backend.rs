//! Broker trait definitions
//!
//! Two seams: the publisher used by the ingestion path, and the
//! connector/channel pair driven by the notification worker. The worker
//! never sees broker-client types, only these traits, so its state machine
//! is tested against an in-process fake.

use async_trait::async_trait;

use crate::AlertMessage;

use super::error::BrokerResult;

/// One message taken off the queue, with the tag needed to settle it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: u64,
    pub payload: Vec<u8>,
}

/// Fire-and-forget alert publisher.
///
/// Implementations keep one long-lived channel; durability comes from the
/// broker's durable queue, not from waiting on delivery confirmation.
#[async_trait]
pub trait AlertPublisher: Send + Sync {
    async fn publish(&self, message: &AlertMessage) -> BrokerResult<()>;
}

/// Opens consumer channels. Each connect declares the durable topology and
/// caps in-flight deliveries at one.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> BrokerResult<Box<dyn BrokerChannel>>;
}

/// An open consumer channel with manual per-message settlement.
#[async_trait]
pub trait BrokerChannel: Send {
    /// Wait for the next delivery. `Ok(None)` means the broker closed the
    /// stream; the caller should reconnect.
    async fn next_delivery(&mut self) -> BrokerResult<Option<Delivery>>;

    /// Acknowledge exactly one delivery, never cumulatively.
    async fn ack(&mut self, tag: u64) -> BrokerResult<()>;

    /// Reject one delivery. With `requeue` the broker redelivers it later;
    /// without, the message is dropped as poison.
    async fn reject(&mut self, tag: u64, requeue: bool) -> BrokerResult<()>;

    /// Best-effort graceful close of channel and connection.
    async fn close(&mut self);
}
