//! # PayHub Webhooks
//!
//! Durable signed webhook delivery (spec.md section 4.9): SSRF-safe URL
//! validation at enqueue time, HMAC-signed payloads, a send path that
//! classifies the outcome for the worker's ack/nack decision (spec.md
//! 4.10), and the exponential-backoff retry schedule driven through the
//! durable queue's delayed publish.

pub mod url_validation;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use payhub_queue::DurableQueue;
use payhub_storage::{Storage, StorageError};
use payhub_types::{PayhubError, WebhookEvent, WebhookStatus};

/// `max_attempts` written onto every freshly enqueued event (spec.md 4.9).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Ordered backoff schedule; the last entry repeats once attempts exceed
/// its length (spec.md 4.9's "clamped to the last on overflow").
pub const RETRY_SCHEDULE_SECS: &[u64] = &[60, 300, 900, 3600];

/// Signatures older than this are rejected by [`verify_signature`]
/// (spec.md 4.9/4.11, shared by both reference providers).
pub const SIGNATURE_MAX_AGE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub secret: String,
    /// Accept `http://` destinations. Spec.md 4.9: only permitted in
    /// development.
    pub allow_http: bool,
    pub queue_name: String,
    pub request_timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            allow_http: false,
            queue_name: "webhooks".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

fn build_signature(secret: &str, ts: i64, payload: &[u8]) -> String {
    let mut signed = format!("{ts}.").into_bytes();
    signed.extend_from_slice(payload);
    format!("t={ts},v1={}", payhub_crypto::hmac_sha256_hex(&signed, secret.as_bytes()))
}

/// Parses a `t=<ts>,v1=<hex>` header, rejecting anything older than
/// [`SIGNATURE_MAX_AGE_SECS`] (spec.md 4.9).
pub fn verify_signature(secret: &str, header: &str, payload: &[u8]) -> bool {
    let mut ts: Option<i64> = None;
    let mut sig: Option<&str> = None;
    for part in header.split(',') {
        let mut kv = part.splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(v)) => ts = v.parse().ok(),
            (Some("v1"), Some(v)) => sig = Some(v),
            _ => {}
        }
    }
    let (Some(ts), Some(sig)) = (ts, sig) else { return false };
    if (Utc::now().timestamp() - ts).abs() > SIGNATURE_MAX_AGE_SECS {
        return false;
    }
    let mut signed = format!("{ts}.").into_bytes();
    signed.extend_from_slice(payload);
    payhub_crypto::verify_hmac_sha256_hex(&signed, sig, secret.as_bytes())
}

/// The result of one [`WebhookSender::send`] attempt, carrying enough
/// detail for the worker loop to choose ack vs. nack(requeue) (spec.md
/// 4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Non-2xx or transport failure; a redelivery has already been
    /// scheduled through the queue's delayed publish.
    Retrying,
    /// Final attempt failed; the row is now terminally `failed`.
    Exhausted,
    AlreadySent,
    AlreadyFailed,
    /// No such row — the AMQP message references a webhook that was
    /// never persisted, or already garbage-collected.
    MissingRowDiscarded,
}

#[derive(Clone)]
pub struct WebhookSender {
    storage: Storage,
    queue: Arc<dyn DurableQueue>,
    http: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookSender {
    pub fn new(storage: Storage, queue: Arc<dyn DurableQueue>, config: WebhookConfig) -> Self {
        Self { storage, queue, http: reqwest::Client::new(), config }
    }

    /// Validates the destination URL, stamps `event_type`/`timestamp`
    /// onto the payload, signs it, persists a `pending` row, and
    /// publishes the webhook id to the durable queue (spec.md 4.9
    /// `Enqueue`).
    pub async fn enqueue(
        &self,
        payment_id: Option<Uuid>,
        event_type: &str,
        mut payload: JsonValue,
        destination_url: &str,
    ) -> Result<Uuid, PayhubError> {
        let url = url_validation::validate(destination_url, self.config.allow_http)
            .map_err(|e| PayhubError::Validation(e.to_string()))?;

        let now = Utc::now();
        if let JsonValue::Object(map) = &mut payload {
            map.insert("event_type".to_string(), JsonValue::String(event_type.to_string()));
            map.insert("timestamp".to_string(), JsonValue::String(now.to_rfc3339()));
        }
        let payload_bytes = serde_json::to_vec(&payload)
            .map_err(|e| PayhubError::Internal(format!("failed to serialize webhook payload: {e}")))?;
        let signature = build_signature(&self.config.secret, now.timestamp(), &payload_bytes);

        let id = Uuid::new_v4();
        let event = WebhookEvent {
            id,
            payment_id,
            event_type: event_type.to_string(),
            payload,
            destination_url: url.to_string(),
            signature: Some(signature),
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            next_retry_at: None,
            last_error: None,
            status: WebhookStatus::Pending,
            created_at: now,
            sent_at: None,
        };
        self.storage.insert_webhook_event(&event).await.map_err(PayhubError::from)?;
        self.queue
            .publish(&self.config.queue_name, id.to_string().as_bytes())
            .await
            .map_err(PayhubError::from)?;
        tracing::debug!(webhook_id = %id, %event_type, "webhook enqueued");
        Ok(id)
    }

    /// Sends one delivery attempt (spec.md 4.9 `Send`). A missing row, an
    /// already-terminal row, and a fresh delivery are all distinguished in
    /// the returned [`SendOutcome`] so the worker can decide ack/nack.
    pub async fn send(&self, webhook_id: Uuid) -> Result<SendOutcome, PayhubError> {
        let event = match self.storage.get_webhook_event(webhook_id).await {
            Ok(event) => event,
            Err(StorageError::NotFound(_)) => return Ok(SendOutcome::MissingRowDiscarded),
            Err(e) => return Err(e.into()),
        };

        match event.status {
            WebhookStatus::Sent => return Ok(SendOutcome::AlreadySent),
            WebhookStatus::Failed => return Ok(SendOutcome::AlreadyFailed),
            WebhookStatus::Pending => {}
        }

        let signature = event.signature.clone().unwrap_or_default();
        let result = self
            .http
            .post(&event.destination_url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", &signature)
            .header("X-Webhook-Id", event.id.to_string())
            .header("X-Event-Type", &event.event_type)
            .timeout(self.config.request_timeout)
            .json(&event.payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                self.storage.mark_webhook_sent(event.id).await.map_err(PayhubError::from)?;
                tracing::debug!(webhook_id = %event.id, "webhook delivered");
                Ok(SendOutcome::Sent)
            }
            Ok(response) => {
                self.handle_failure(&event, format!("destination returned {}", response.status())).await
            }
            Err(e) => self.handle_failure(&event, e.to_string()).await,
        }
    }

    async fn handle_failure(&self, event: &WebhookEvent, error: String) -> Result<SendOutcome, PayhubError> {
        let attempts = event.attempts + 1;
        if attempts >= event.max_attempts {
            self.storage
                .record_webhook_failure(event.id, attempts, &error, None, true)
                .await
                .map_err(PayhubError::from)?;
            tracing::warn!(webhook_id = %event.id, attempts, "webhook delivery exhausted retries");
            return Ok(SendOutcome::Exhausted);
        }

        let delay_secs = RETRY_SCHEDULE_SECS
            .get((attempts - 1) as usize)
            .copied()
            .unwrap_or_else(|| *RETRY_SCHEDULE_SECS.last().expect("retry schedule is non-empty"));
        let next_retry_at = Utc::now() + chrono::Duration::seconds(delay_secs as i64);

        self.storage
            .record_webhook_failure(event.id, attempts, &error, Some(next_retry_at), false)
            .await
            .map_err(PayhubError::from)?;
        self.queue
            .publish_delayed(
                &self.config.queue_name,
                event.id.to_string().as_bytes(),
                Duration::from_secs(delay_secs),
            )
            .await
            .map_err(PayhubError::from)?;
        tracing::debug!(webhook_id = %event.id, attempts, delay_secs, "webhook delivery scheduled for retry");
        Ok(SendOutcome::Retrying)
    }

    /// Republishes every row due for redelivery (spec.md 4.9's periodic
    /// sweeper): pending, past `next_retry_at` or never scheduled, and not
    /// yet exhausted. Returns the number of rows republished.
    pub async fn sweep(&self) -> Result<usize, PayhubError> {
        let due = self.storage.list_webhooks_due_for_sweep().await.map_err(PayhubError::from)?;
        for id in &due {
            self.queue
                .publish(&self.config.queue_name, id.to_string().as_bytes())
                .await
                .map_err(PayhubError::from)?;
        }
        if !due.is_empty() {
            tracing::debug!(count = due.len(), "webhook sweep republished due rows");
        }
        Ok(due.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trips() {
        let secret = "whsec_test";
        let payload = br#"{"event_type":"payment.completed"}"#;
        let ts = Utc::now().timestamp();
        let header = build_signature(secret, ts, payload);
        assert!(verify_signature(secret, &header, payload));
    }

    #[test]
    fn signature_rejects_tampered_payload() {
        let secret = "whsec_test";
        let ts = Utc::now().timestamp();
        let header = build_signature(secret, ts, b"original");
        assert!(!verify_signature(secret, &header, b"tampered"));
    }

    #[test]
    fn signature_rejects_stale_header() {
        let secret = "whsec_test";
        let payload = b"payload";
        let old_ts = Utc::now().timestamp() - 301;
        let header = build_signature(secret, old_ts, payload);
        assert!(!verify_signature(secret, &header, payload));
    }

    #[test]
    fn retry_schedule_clamps_to_last_entry_on_overflow() {
        let idx = 10usize;
        let delay = RETRY_SCHEDULE_SECS.get(idx).copied().unwrap_or(*RETRY_SCHEDULE_SECS.last().unwrap());
        assert_eq!(delay, *RETRY_SCHEDULE_SECS.last().unwrap());
    }
}
