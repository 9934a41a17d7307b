//! Resilient broker consumer
//!
//! This module implements the notification side of the pipeline: a worker
//! that consumes alert messages from the broker and turns each one into a
//! status-report email. The worker is a small state machine around one
//! broker channel at a time.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected --connect attempt--> Connecting --success--> Consuming
//!      ^                                |                       |
//!      |          attempt failed,       |                       | channel lost
//!      |          backoff + retry       |                       | (stream end or error)
//!      |<--------------------------------                       |
//!      |<-------------------------------------------------------
//!
//! Connecting --budget exhausted--> fatal error (worker exits)
//! Consuming  --shutdown signal---> clean exit
//! ```
//!
//! ## Delivery semantics
//!
//! - One unsettled delivery at a time (prefetch 1, manual settlement).
//! - Mail sent successfully: the delivery is acked.
//! - Mail failed: the delivery is rejected with requeue, so another run
//!   (or another consumer) picks it up again. At-least-once overall.
//! - Undecodable payload: rejected without requeue so a poison message
//!   cannot wedge the queue.
//! - Shutdown mid-delivery: rejected with requeue before closing, so the
//!   message is redelivered after restart.

pub mod backoff;
pub mod worker;

pub use backoff::Backoff;
pub use worker::{NotificationWorker, WorkerPhase};
