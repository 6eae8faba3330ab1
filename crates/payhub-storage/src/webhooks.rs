use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

use payhub_types::{WebhookEvent, WebhookStatus};

use crate::error::StorageError;
use crate::Storage;

#[derive(Debug, FromRow)]
struct WebhookRow {
    id: Uuid,
    payment_id: Option<Uuid>,
    event_type: String,
    payload: JsonValue,
    destination_url: String,
    signature: Option<String>,
    attempts: i32,
    max_attempts: i32,
    next_retry_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
}

impl From<WebhookRow> for WebhookEvent {
    fn from(r: WebhookRow) -> Self {
        WebhookEvent {
            id: r.id,
            payment_id: r.payment_id,
            event_type: r.event_type,
            payload: r.payload,
            destination_url: r.destination_url,
            signature: r.signature,
            attempts: r.attempts as u32,
            max_attempts: r.max_attempts as u32,
            next_retry_at: r.next_retry_at,
            last_error: r.last_error,
            status: match r.status.as_str() {
                "sent" => WebhookStatus::Sent,
                "failed" => WebhookStatus::Failed,
                _ => WebhookStatus::Pending,
            },
            created_at: r.created_at,
            sent_at: r.sent_at,
        }
    }
}

fn status_str(s: WebhookStatus) -> &'static str {
    match s {
        WebhookStatus::Pending => "pending",
        WebhookStatus::Sent => "sent",
        WebhookStatus::Failed => "failed",
    }
}

impl Storage {
    pub async fn insert_webhook_event(&self, event: &WebhookEvent) -> Result<(), StorageError> {
        self.note(
            sqlx::query(
                "INSERT INTO webhook_events \
                 (id, payment_id, event_type, payload, destination_url, signature, attempts, \
                  max_attempts, next_retry_at, last_error, status, created_at, sent_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .bind(event.id)
            .bind(event.payment_id)
            .bind(&event.event_type)
            .bind(&event.payload)
            .bind(&event.destination_url)
            .bind(&event.signature)
            .bind(event.attempts as i32)
            .bind(event.max_attempts as i32)
            .bind(event.next_retry_at)
            .bind(&event.last_error)
            .bind(status_str(event.status))
            .bind(event.created_at)
            .bind(event.sent_at)
            .execute(&self.pool)
            .await
            .map(|_| ()),
        )
    }

    pub async fn get_webhook_event(&self, id: Uuid) -> Result<WebhookEvent, StorageError> {
        let row: Option<WebhookRow> = self.note(
            sqlx::query_as(
                "SELECT id, payment_id, event_type, payload, destination_url, signature, \
                 attempts, max_attempts, next_retry_at, last_error, status, created_at, sent_at \
                 FROM webhook_events WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await,
        )?;
        row.map(Into::into)
            .ok_or_else(|| StorageError::NotFound(format!("webhook event {id}")))
    }

    pub async fn mark_webhook_sent(&self, id: Uuid) -> Result<(), StorageError> {
        self.note(
            sqlx::query(
                "UPDATE webhook_events SET status = 'sent', sent_at = now() WHERE id = $1",
            )
            .bind(id)
            .execute(&self.pool)
            .await
            .map(|_| ()),
        )
    }

    /// Records a failed delivery attempt: `attempts += 1`, and either a
    /// terminal `failed` status or a fresh `next_retry_at` (spec.md 4.9
    /// `handleFailure`).
    pub async fn record_webhook_failure(
        &self,
        id: Uuid,
        attempts: u32,
        last_error: &str,
        next_retry_at: Option<DateTime<Utc>>,
        terminal: bool,
    ) -> Result<(), StorageError> {
        self.note(
            sqlx::query(
                "UPDATE webhook_events SET attempts = $2, last_error = $3, next_retry_at = $4, \
                 status = CASE WHEN $5 THEN 'failed' ELSE status END WHERE id = $1",
            )
            .bind(id)
            .bind(attempts as i32)
            .bind(last_error)
            .bind(next_retry_at)
            .bind(terminal)
            .execute(&self.pool)
            .await
            .map(|_| ()),
        )
    }

    /// Rows due for the periodic sweep (spec.md 4.9): pending, not yet
    /// exhausted, and either never scheduled or past their retry time.
    /// Bounded to 100 rows per sweep, oldest first.
    pub async fn list_webhooks_due_for_sweep(&self) -> Result<Vec<Uuid>, StorageError> {
        self.note(
            sqlx::query_scalar(
                "SELECT id FROM webhook_events \
                 WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= now()) \
                 AND attempts < max_attempts \
                 ORDER BY created_at ASC LIMIT 100",
            )
            .fetch_all(&self.pool)
            .await,
        )
    }
}
