//! # PayHub Queue
//!
//! The durable queue adapter (spec.md section 4.3/4.9/4.10): enqueue with
//! delay, consume-with-ack, dead-letter semantics, backed by AMQP. The
//! delayed-exchange plugin is not assumed present (spec.md section 9's
//! ambiguity note permits either a broker-delayed message or an in-process
//! timer); this adapter uses an in-process timer and republishes, so
//! handlers downstream must tolerate duplicate delivery — which the
//! webhook sender already does by checking status before acting.

use std::time::Duration;

use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use futures_lite::StreamExt;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
}

impl From<QueueError> for payhub_types::PayhubError {
    fn from(e: QueueError) -> Self {
        payhub_types::PayhubError::Internal(e.to_string())
    }
}

/// A delivered message awaiting acknowledgement. The webhook worker calls
/// exactly one of `ack`/`nack` per message (spec.md 4.10).
pub struct Delivery {
    inner: lapin::message::Delivery,
    channel: Channel,
}

impl Delivery {
    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }

    pub async fn ack(&self) -> Result<(), QueueError> {
        self.channel
            .basic_ack(self.inner.delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    pub async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        self.channel
            .basic_nack(
                self.inner.delivery_tag,
                BasicNackOptions { requeue, ..Default::default() },
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
pub trait DurableQueue: Send + Sync {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), QueueError>;

    /// Publish after `delay` elapses. Implementations may deliver this via
    /// an in-process timer (duplicate delivery must then be tolerated by
    /// the consumer) or a broker delayed-exchange feature.
    async fn publish_delayed(
        &self,
        queue: &str,
        payload: &[u8],
        delay: Duration,
    ) -> Result<(), QueueError>;
}

fn dead_letter_exchange_name(queue: &str) -> String {
    format!("{queue}.dlx")
}

fn dead_letter_queue_name(queue: &str) -> String {
    format!("{queue}.dead")
}

/// AMQP-backed implementation of [`DurableQueue`], with a dead-letter
/// exchange declared alongside every queue it publishes to so that a
/// `nack(requeue: false)` routes the message to a `<queue>.dead` queue
/// instead of discarding it silently.
#[derive(Clone)]
pub struct AmqpQueue {
    channel: Channel,
}

impl AmqpQueue {
    pub async fn connect(amqp_url: &str) -> Result<Self, QueueError> {
        let connection =
            Connection::connect(amqp_url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        Ok(Self { channel })
    }

    /// Declares `queue`, its dead-letter exchange, and the paired dead
    /// letter queue. Idempotent: safe to call on every startup.
    pub async fn declare_topology(&self, queue: &str) -> Result<(), QueueError> {
        let dlx = dead_letter_exchange_name(queue);
        let dlq = dead_letter_queue_name(queue);

        self.channel
            .exchange_declare(
                &dlx,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?;

        self.channel
            .queue_declare(
                &dlq,
                QueueDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?;

        self.channel
            .queue_bind(&dlq, &dlx, "", QueueBindOptions::default(), FieldTable::default())
            .await?;

        let mut args = FieldTable::default();
        args.insert("x-dead-letter-exchange".into(), dlx.into());

        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions { durable: true, ..Default::default() },
                args,
            )
            .await?;

        Ok(())
    }

    /// Subscribes to `queue` with the prefetch-1 / manual-ack contract
    /// spec.md 4.10 requires.
    pub async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<Subscription, QueueError> {
        self.channel
            .basic_qos(1, BasicQosOptions::default())
            .await?;

        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok(Subscription { consumer, channel: self.channel.clone() })
    }
}

/// A live subscription to a queue. Call [`Subscription::recv`] in a loop;
/// each returned [`Delivery`] must be acked or nacked exactly once.
pub struct Subscription {
    consumer: lapin::Consumer,
    channel: Channel,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            match self.consumer.next().await {
                Some(Ok(inner)) => return Some(Delivery { inner, channel: self.channel.clone() }),
                Some(Err(e)) => {
                    error!(error = %e, "amqp consumer error");
                    continue;
                }
                None => return None,
            }
        }
    }
}

#[async_trait]
impl DurableQueue for AmqpQueue {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), QueueError> {
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await?
            .await?;
        Ok(())
    }

    async fn publish_delayed(
        &self,
        queue: &str,
        payload: &[u8],
        delay: Duration,
    ) -> Result<(), QueueError> {
        if delay.is_zero() {
            return self.publish(queue, payload).await;
        }
        let channel = self.channel.clone();
        let queue = queue.to_string();
        let payload = payload.to_vec();
        debug!(?delay, %queue, "scheduling delayed publish via in-process timer");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result = channel
                .basic_publish(
                    "",
                    &queue,
                    BasicPublishOptions::default(),
                    &payload,
                    BasicProperties::default().with_delivery_mode(2),
                )
                .await;
            match result {
                Ok(confirm) => {
                    if let Err(e) = confirm.await {
                        warn!(error = %e, %queue, "delayed publish confirmation failed");
                    }
                }
                Err(e) => warn!(error = %e, %queue, "delayed publish failed"),
            }
        });
        Ok(())
    }
}
