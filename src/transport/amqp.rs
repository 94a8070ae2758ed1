// AMQP transport over lapin.
//
// The consumer keeps one long-lived connection and processes deliveries one
// at a time. The publisher opens a short-lived connection per message, which
// keeps it independent of the consumer's connection state.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::supervisor::MessageSource;
use super::{settlement, AckMode, BrokerSettings, Settlement};
use crate::publish::Publisher;
use crate::router::Router;

const REPLY_SUCCESS: u16 = 200;

async fn connect(settings: &BrokerSettings) -> Result<Connection> {
    tokio::time::timeout(
        settings.timeout,
        Connection::connect(&settings.url, ConnectionProperties::default()),
    )
    .await
    .with_context(|| format!("Timed out connecting to broker after {:?}", settings.timeout))?
    .context("Failed to connect to broker")
}

/// Close channel then connection, logging failures.
async fn close(channel: &Channel, connection: &Connection, reason: &str) {
    if let Err(e) = channel.close(REPLY_SUCCESS, reason).await {
        debug!(error = %e, reason, "Failed to close AMQP channel");
    }
    if let Err(e) = connection.close(REPLY_SUCCESS, reason).await {
        debug!(error = %e, reason, "Failed to close AMQP connection");
    }
}

async fn declare(channel: &Channel, queue: &str, durable: bool) -> Result<()> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("Failed to declare queue {queue}"))?;
    Ok(())
}

/// Connect and immediately disconnect. Used by `status`.
pub async fn check_reachable(settings: &BrokerSettings) -> Result<()> {
    let connection = connect(settings).await?;
    connection
        .close(REPLY_SUCCESS, "status check")
        .await
        .context("Failed to close broker connection")
}

pub struct AmqpConsumer {
    settings: BrokerSettings,
    queue: String,
    ack_mode: AckMode,
}

impl AmqpConsumer {
    pub fn new(settings: BrokerSettings, queue: impl Into<String>, ack_mode: AckMode) -> Self {
        Self {
            settings,
            queue: queue.into(),
            ack_mode,
        }
    }
}

#[async_trait]
impl MessageSource for AmqpConsumer {
    async fn consume(&self, router: &Router, shutdown: &CancellationToken) -> Result<()> {
        let connection = connect(&self.settings).await?;
        let channel = connection
            .create_channel()
            .await
            .context("Failed to open consumer channel")?;
        declare(&channel, &self.queue, self.settings.durable).await?;

        if self.ack_mode == AckMode::AfterProcessing {
            channel
                .basic_qos(1, BasicQosOptions::default())
                .await
                .context("Failed to set prefetch")?;
        }

        let mut consumer = channel
            .basic_consume(
                &self.queue,
                "postscreen",
                BasicConsumeOptions {
                    no_ack: self.ack_mode == AckMode::OnReceipt,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to consume from {}", self.queue))?;

        info!(
            queue = %self.queue,
            ack_mode = self.ack_mode.name(),
            durable = self.settings.durable,
            "Waiting for messages"
        );

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = consumer.next() => next,
            };

            let Some(delivery) = next else {
                warn!(queue = %self.queue, "Delivery stream closed by broker");
                return Ok(());
            };
            let delivery = delivery.context("Delivery failed")?;
            debug!(
                bytes = delivery.data.len(),
                redelivered = delivery.redelivered,
                "Received message"
            );

            let outcome = router.route(&delivery.data).await;

            match settlement(self.ack_mode, &outcome) {
                Some(Settlement::Ack) => delivery
                    .ack(BasicAckOptions::default())
                    .await
                    .context("Failed to ack message")?,
                Some(Settlement::Reject) => delivery
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..BasicNackOptions::default()
                    })
                    .await
                    .context("Failed to reject message")?,
                None => {}
            }
        }

        info!(queue = %self.queue, "Consumer shutting down");
        close(&channel, &connection, "shutdown").await;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("amqp consumer on {}", self.queue)
    }
}

pub struct AmqpPublisher {
    settings: BrokerSettings,
}

impl AmqpPublisher {
    pub fn new(settings: BrokerSettings) -> Self {
        Self { settings }
    }

    async fn send(&self, queue: &str, payload: &[u8]) -> Result<()> {
        let connection = connect(&self.settings).await?;
        let channel = connection
            .create_channel()
            .await
            .context("Failed to open publish channel")?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .context("Failed to enable publisher confirms")?;
        declare(&channel, queue, self.settings.durable).await?;

        let confirmation = channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(self.settings.delivery_mode()),
            )
            .await
            .with_context(|| format!("Failed to publish to {queue}"))?
            .await
            .with_context(|| format!("No confirmation from broker for {queue}"))?;

        close(&channel, &connection, "published").await;

        if confirmation.is_nack() {
            anyhow::bail!("Broker rejected message for {queue}");
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for AmqpPublisher {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        tokio::time::timeout(self.settings.timeout, self.send(queue, payload))
            .await
            .with_context(|| {
                format!(
                    "Timed out publishing to {queue} after {:?}",
                    self.settings.timeout
                )
            })?
    }
}
