//! AMQP implementations of the broker traits
//!
//! Topology matches both ends: a durable direct exchange, a durable queue
//! bound with one routing key. Declaration is idempotent, so publisher and
//! consumer can each declare it on connect and start in any order.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tracing::{debug, info, instrument, trace};

use crate::AlertMessage;
use crate::config::BrokerSettings;

use super::backend::{AlertPublisher, BrokerChannel, BrokerConnector, Delivery};
use super::error::{BrokerError, BrokerResult};

const CONSUMER_TAG: &str = "pulsewatch-notifier";

async fn declare_topology(channel: &Channel, settings: &BrokerSettings) -> BrokerResult<()> {
    channel
        .exchange_declare(
            &settings.exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::TopologyFailed(e.to_string()))?;

    channel
        .queue_declare(
            &settings.queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::TopologyFailed(e.to_string()))?;

    channel
        .queue_bind(
            &settings.queue,
            &settings.exchange,
            &settings.routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::TopologyFailed(e.to_string()))?;

    debug!(
        exchange = %settings.exchange,
        queue = %settings.queue,
        routing_key = %settings.routing_key,
        "broker topology declared"
    );
    Ok(())
}

/// Publisher with one long-lived connection and channel.
///
/// Constructed once at collector startup; a broker that is unreachable at
/// that point is a fatal configuration problem, not something to retry
/// while agents queue up.
pub struct AmqpPublisher {
    // the channel dies with the connection, keep both alive together
    _connection: Connection,
    channel: Channel,
    settings: BrokerSettings,
}

impl AmqpPublisher {
    #[instrument(skip(settings), fields(host = %settings.host, port = settings.port))]
    pub async fn connect(settings: BrokerSettings) -> BrokerResult<Self> {
        let connection = Connection::connect(&settings.url(), ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        declare_topology(&channel, &settings).await?;

        info!("alert publisher connected");
        Ok(Self {
            _connection: connection,
            channel,
            settings,
        })
    }
}

#[async_trait]
impl AlertPublisher for AmqpPublisher {
    #[instrument(skip(self, message), fields(email = %message.email))]
    async fn publish(&self, message: &AlertMessage) -> BrokerResult<()> {
        let payload =
            serde_json::to_vec(message).map_err(|e| BrokerError::PublishFailed(e.to_string()))?;

        // fire and forget: the returned confirmation future is dropped
        self.channel
            .basic_publish(
                &self.settings.exchange,
                &self.settings.routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await
            .map_err(|e| BrokerError::PublishFailed(e.to_string()))?;

        trace!("alert message published");
        Ok(())
    }
}

/// Consumer-side connector. Each successful connect yields a channel with
/// the topology declared, prefetch set to one, and a manual-ack consumer
/// already running.
pub struct AmqpConnector {
    settings: BrokerSettings,
}

impl AmqpConnector {
    pub fn new(settings: BrokerSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    #[instrument(skip(self), fields(host = %self.settings.host, queue = %self.settings.queue))]
    async fn connect(&self) -> BrokerResult<Box<dyn BrokerChannel>> {
        let connection = Connection::connect(&self.settings.url(), ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        declare_topology(&channel, &self.settings).await?;

        // one unsettled delivery at a time, so slow SMTP cannot pile up
        // messages in memory
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::TopologyFailed(e.to_string()))?;

        let consumer = channel
            .basic_consume(
                &self.settings.queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::ConsumeFailed(e.to_string()))?;

        info!("consumer channel ready");
        Ok(Box::new(AmqpChannel {
            connection,
            channel,
            consumer,
        }))
    }
}

struct AmqpChannel {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn next_delivery(&mut self) -> BrokerResult<Option<Delivery>> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => Ok(Some(Delivery {
                tag: delivery.delivery_tag,
                payload: delivery.data,
            })),
            Some(Err(e)) => Err(BrokerError::ConsumeFailed(e.to_string())),
            None => Ok(None),
        }
    }

    async fn ack(&mut self, tag: u64) -> BrokerResult<()> {
        self.channel
            .basic_ack(tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|e| BrokerError::SettleFailed(e.to_string()))
    }

    async fn reject(&mut self, tag: u64, requeue: bool) -> BrokerResult<()> {
        self.channel
            .basic_reject(tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| BrokerError::SettleFailed(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.channel.close(200, "shutting down").await {
            debug!("channel close: {e}");
        }
        if let Err(e) = self.connection.close(200, "shutting down").await {
            debug!("connection close: {e}");
        }
    }
}
