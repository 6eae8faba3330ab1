use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, Postgres, Transaction};

use payhub_types::{IdempotencyRecord, IdempotencyStatus};

use crate::error::StorageError;
use crate::Storage;

#[derive(Debug, FromRow)]
struct IdempotencyRow {
    key: String,
    merchant_id: String,
    fingerprint: String,
    path: String,
    method: String,
    status: String,
    response_body: Option<JsonValue>,
    response_status_code: Option<i32>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<IdempotencyRow> for IdempotencyRecord {
    fn from(r: IdempotencyRow) -> Self {
        IdempotencyRecord {
            key: r.key,
            merchant_id: r.merchant_id,
            fingerprint: r.fingerprint,
            path: r.path,
            method: r.method,
            status: if r.status == "completed" {
                IdempotencyStatus::Completed
            } else {
                IdempotencyStatus::Processing
            },
            response_body: r.response_body,
            response_status_code: r.response_status_code.map(|c| c as u16),
            created_at: r.created_at,
            expires_at: r.expires_at,
        }
    }
}

impl Storage {
    pub async fn get_idempotency_record(
        &self,
        key: &str,
        merchant_id: &str,
    ) -> Result<Option<IdempotencyRecord>, StorageError> {
        let row: Option<IdempotencyRow> = self.note(
            sqlx::query_as(
                "SELECT key, merchant_id, fingerprint, path, method, status, response_body, \
                 response_status_code, created_at, expires_at FROM idempotency_records \
                 WHERE key = $1 AND merchant_id = $2",
            )
            .bind(key)
            .bind(merchant_id)
            .fetch_optional(&self.pool)
            .await,
        )?;
        Ok(row.map(Into::into))
    }

    /// Reads the record inside an already-open (advisory-locked)
    /// transaction, for the re-check-under-lock step in `startProcessing`.
    pub async fn get_idempotency_record_locked(
        tx: &mut Transaction<'static, Postgres>,
        key: &str,
        merchant_id: &str,
    ) -> Result<Option<IdempotencyRecord>, StorageError> {
        let row: Option<IdempotencyRow> = sqlx::query_as(
            "SELECT key, merchant_id, fingerprint, path, method, status, response_body, \
             response_status_code, created_at, expires_at FROM idempotency_records \
             WHERE key = $1 AND merchant_id = $2",
        )
        .bind(key)
        .bind(merchant_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn insert_processing_record(
        tx: &mut Transaction<'static, Postgres>,
        key: &str,
        merchant_id: &str,
        fingerprint: &str,
        path: &str,
        method: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO idempotency_records \
             (key, merchant_id, fingerprint, path, method, status, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, 'processing', now(), $6)",
        )
        .bind(key)
        .bind(merchant_id)
        .bind(fingerprint)
        .bind(path)
        .bind(method)
        .bind(expires_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn complete_idempotency_record(
        &self,
        key: &str,
        merchant_id: &str,
        response_body: &JsonValue,
        status_code: u16,
    ) -> Result<(), StorageError> {
        self.note(
            sqlx::query(
                "UPDATE idempotency_records SET status = 'completed', response_body = $3, \
                 response_status_code = $4 WHERE key = $1 AND merchant_id = $2",
            )
            .bind(key)
            .bind(merchant_id)
            .bind(response_body)
            .bind(status_code as i32)
            .execute(&self.pool)
            .await
            .map(|_| ()),
        )
    }

    pub async fn delete_idempotency_record(
        &self,
        key: &str,
        merchant_id: &str,
    ) -> Result<(), StorageError> {
        self.note(
            sqlx::query("DELETE FROM idempotency_records WHERE key = $1 AND merchant_id = $2")
                .bind(key)
                .bind(merchant_id)
                .execute(&self.pool)
                .await
                .map(|_| ()),
        )
    }

    /// Deletes every row past its `expires_at`. Invoked by the periodic
    /// sweeper (spec.md 4.5's "external collaborator").
    pub async fn delete_expired_idempotency_records(&self) -> Result<u64, StorageError> {
        self.note(
            sqlx::query("DELETE FROM idempotency_records WHERE expires_at < now()")
                .execute(&self.pool)
                .await
                .map(|r| r.rows_affected()),
        )
    }
}
