//! Broker abstraction for alert delivery
//!
//! Alerts travel from the collector to the notifier over a durable,
//! direct-routed exchange with one durable bound queue. Both sides go
//! through narrow traits so tests can run against in-process fakes:
//!
//! - [`AlertPublisher`] is the collector side: fire-and-forget publishes on
//!   one long-lived channel.
//! - [`BrokerConnector`] / [`BrokerChannel`] are the notifier side: every
//!   connect declares the topology, sets a prefetch of one in-flight
//!   message, and hands out deliveries for manual per-message settlement.
//!
//! The AMQP implementations live in [`amqp`].

pub mod amqp;
pub mod backend;
pub mod error;

pub use backend::{AlertPublisher, BrokerChannel, BrokerConnector, Delivery};
pub use error::{BrokerError, BrokerResult};
