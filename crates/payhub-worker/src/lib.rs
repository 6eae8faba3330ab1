//! # PayHub Worker
//!
//! The webhook delivery worker (spec.md section 4.10): a prefetch-1,
//! manual-ack consumer loop over the durable queue's `webhooks` stream,
//! and an independent ticker re-publishing rows due for retry.

use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;

use payhub_queue::AmqpQueue;
use payhub_webhooks::WebhookSender;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue_name: String,
    pub consumer_tag: String,
    /// How often the sweep ticker republishes rows due for retry
    /// (spec.md 4.9's periodic sweeper).
    pub sweep_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_name: "webhooks".to_string(),
            consumer_tag: "payhub-worker".to_string(),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Consumes webhook-delivery messages until `shutdown` reports `true`
/// (spec.md 4.10). Every message is acked or nacked exactly once:
///
/// - A completed [`WebhookSender::send`] call — delivered, rescheduled for
///   retry, exhausted, or a harmless duplicate of an already-terminal row —
///   is acked in every case; the sender has already durably recorded the
///   outcome, so there is nothing left for redelivery of this message to
///   accomplish.
/// - An `Err` from `send` itself (storage unreachable, not a delivery
///   outcome) nacks with `requeue: true`: the failure is the worker's own,
///   and the message should come back around once the dependency recovers.
pub async fn run_webhook_consumer(
    queue: &AmqpQueue,
    sender: WebhookSender,
    config: &WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), payhub_queue::QueueError> {
    queue.declare_topology(&config.queue_name).await?;
    let mut subscription = queue.consume(&config.queue_name, &config.consumer_tag).await?;

    loop {
        let delivery = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("webhook consumer shutting down");
                    return Ok(());
                }
                continue;
            }
            delivery = subscription.recv() => delivery,
        };

        let Some(delivery) = delivery else {
            tracing::warn!("webhook consumer stream closed");
            return Ok(());
        };

        let Ok(webhook_id) = std::str::from_utf8(delivery.data()).ok().and_then(|s| Uuid::parse_str(s).ok())
        else {
            tracing::error!("discarding malformed webhook queue message");
            let _ = delivery.nack(false).await;
            continue;
        };

        match sender.send(webhook_id).await {
            Ok(outcome) => {
                tracing::debug!(%webhook_id, ?outcome, "webhook delivery attempt handled");
                if let Err(e) = delivery.ack().await {
                    tracing::error!(%webhook_id, error = %e, "failed to ack webhook message");
                }
            }
            Err(e) => {
                tracing::error!(%webhook_id, error = %e, "webhook send failed, requeueing");
                if let Err(e) = delivery.nack(true).await {
                    tracing::error!(%webhook_id, error = %e, "failed to nack webhook message");
                }
            }
        }
    }
}

/// Republishes rows due for retry on a fixed interval, independent of the
/// consumer loop (spec.md 4.9). Runs until `shutdown` reports `true`.
pub async fn run_sweep_ticker(sender: WebhookSender, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("webhook sweep ticker shutting down");
                    return;
                }
            }
            _ = ticker.tick() => {
                match sender.sweep().await {
                    Ok(count) if count > 0 => tracing::info!(count, "webhook sweep republished due rows"),
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "webhook sweep failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_queue_name() {
        let config = WorkerConfig::default();
        assert_eq!(config.queue_name, "webhooks");
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }
}
