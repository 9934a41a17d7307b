//! Consumer worker turning broker deliveries into emails.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::AlertMessage;
use crate::broker::{BrokerChannel, BrokerConnector, Delivery};
use crate::config::RetrySettings;
use crate::mailer::Mailer;
use crate::notify::backoff::Backoff;
use crate::util::from_json_case_insensitive;

/// Externally observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Disconnected,
    Connecting,
    Consuming,
}

/// Why a consume loop ended.
enum ConsumeEnd {
    Shutdown,
    ChannelLost,
}

/// Outcome of one delivery.
enum DeliveryEnd {
    Settled,
    Shutdown,
    ChannelLost,
}

pub struct NotificationWorker {
    connector: Arc<dyn BrokerConnector>,
    mailer: Arc<dyn Mailer>,
    backoff: Backoff,
    max_attempts: u32,
    phase: watch::Sender<WorkerPhase>,
}

impl NotificationWorker {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        mailer: Arc<dyn Mailer>,
        retry: &RetrySettings,
    ) -> Self {
        let (phase, _) = watch::channel(WorkerPhase::Disconnected);
        Self {
            connector,
            mailer,
            backoff: Backoff::from(retry),
            max_attempts: retry.max_attempts,
            phase,
        }
    }

    /// Subscribe to lifecycle transitions.
    pub fn phase(&self) -> watch::Receiver<WorkerPhase> {
        self.phase.subscribe()
    }

    /// Drive the consumer until the shutdown signal flips or the reconnect
    /// budget runs out. A lost channel reconnects with a fresh budget; a
    /// budget exhausted while the broker stays unreachable is fatal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        loop {
            let Some(mut channel) = self.connect_with_backoff(&mut shutdown).await? else {
                self.phase.send_replace(WorkerPhase::Disconnected);
                return Ok(());
            };

            self.phase.send_replace(WorkerPhase::Consuming);
            info!("consuming notifications");

            match self.consume(channel.as_mut(), &mut shutdown).await {
                ConsumeEnd::Shutdown => {
                    channel.close().await;
                    self.phase.send_replace(WorkerPhase::Disconnected);
                    info!("consumer stopped");
                    return Ok(());
                }
                ConsumeEnd::ChannelLost => {
                    warn!("broker channel lost, reconnecting");
                }
            }
        }
    }

    /// Returns `Ok(None)` when shutdown arrived before a channel came up.
    async fn connect_with_backoff(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<Option<Box<dyn BrokerChannel>>> {
        self.phase.send_replace(WorkerPhase::Connecting);

        for attempt in 1..=self.max_attempts {
            match self.connector.connect().await {
                Ok(channel) => {
                    if attempt > 1 {
                        info!(attempt, "broker connection restored");
                    }
                    return Ok(Some(channel));
                }
                Err(e) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(attempt, "broker connect failed, retrying in {delay:?}: {e}");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {
                            info!("shutdown while reconnecting");
                            return Ok(None);
                        }
                    }
                }
            }
        }

        error!(attempts = self.max_attempts, "broker unreachable, giving up");
        anyhow::bail!("broker unreachable after {} attempts", self.max_attempts)
    }

    async fn consume(
        &self,
        channel: &mut dyn BrokerChannel,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ConsumeEnd {
        loop {
            let next = tokio::select! {
                next = channel.next_delivery() => next,
                _ = shutdown.changed() => return ConsumeEnd::Shutdown,
            };

            match next {
                Ok(Some(delivery)) => {
                    match self.handle_delivery(channel, delivery, shutdown).await {
                        DeliveryEnd::Settled => {}
                        DeliveryEnd::Shutdown => return ConsumeEnd::Shutdown,
                        DeliveryEnd::ChannelLost => return ConsumeEnd::ChannelLost,
                    }
                }
                Ok(None) => {
                    info!("delivery stream ended");
                    return ConsumeEnd::ChannelLost;
                }
                Err(e) => {
                    warn!("delivery stream failed: {e}");
                    return ConsumeEnd::ChannelLost;
                }
            }
        }
    }

    async fn handle_delivery(
        &self,
        channel: &mut dyn BrokerChannel,
        delivery: Delivery,
        shutdown: &mut watch::Receiver<bool>,
    ) -> DeliveryEnd {
        let tag = delivery.tag;

        let message: AlertMessage = match decode_payload(&delivery.payload) {
            Ok(message) => message,
            Err(reason) => {
                warn!(tag, "poison message dropped: {reason}");
                return match channel.reject(tag, false).await {
                    Ok(()) => DeliveryEnd::Settled,
                    Err(e) => {
                        warn!(tag, "reject failed: {e}");
                        DeliveryEnd::ChannelLost
                    }
                };
            }
        };

        let sent = tokio::select! {
            sent = self.mailer.send_status_report(&message.email, &message.report) => sent,
            _ = shutdown.changed() => {
                // hand the in-flight message back before closing
                if let Err(e) = channel.reject(tag, true).await {
                    warn!(tag, "requeue on shutdown failed: {e}");
                }
                return DeliveryEnd::Shutdown;
            }
        };

        match sent {
            Ok(()) => {
                debug!(tag, email = %message.email, "status report delivered");
                match channel.ack(tag).await {
                    Ok(()) => DeliveryEnd::Settled,
                    Err(e) => {
                        warn!(tag, "ack failed: {e}");
                        DeliveryEnd::ChannelLost
                    }
                }
            }
            Err(e) => {
                warn!(tag, email = %message.email, "delivery failed, requeueing: {e}");
                match channel.reject(tag, true).await {
                    Ok(()) => DeliveryEnd::Settled,
                    Err(e) => {
                        warn!(tag, "reject failed: {e}");
                        DeliveryEnd::ChannelLost
                    }
                }
            }
        }
    }
}

/// Decode a delivery payload, describing the payload in the error so
/// poison messages can be diagnosed from the log.
fn decode_payload(payload: &[u8]) -> Result<AlertMessage, String> {
    match std::str::from_utf8(payload) {
        Ok(text) => from_json_case_insensitive(text).map_err(|e| format!("{e} (payload: {text})")),
        Err(e) => Err(format!("payload is not utf-8: {e}")),
    }
}
