use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Postgres, Row, Transaction};
use uuid::Uuid;

use payhub_types::{Money, Payment, PaymentStatus, Transaction as PaymentTransaction};

use crate::error::StorageError;
use crate::Storage;

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    external_id: Option<String>,
    merchant_id: String,
    amount: Decimal,
    currency: String,
    status: String,
    provider: String,
    provider_transaction_id: Option<String>,
    description: Option<String>,
    metadata: JsonValue,
    webhook_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_payment(self) -> Result<Payment, StorageError> {
        let amount = Money::parse(&self.amount.to_string(), &self.currency)
            .map_err(|e| StorageError::NotFound(e.to_string()))?;
        let status = parse_status(&self.status)?;
        let metadata = match self.metadata {
            JsonValue::Object(map) => map.into_iter().collect(),
            _ => Default::default(),
        };
        Ok(Payment {
            id: self.id,
            external_id: self.external_id,
            merchant_id: self.merchant_id,
            amount,
            status,
            provider: self.provider,
            provider_transaction_id: self.provider_transaction_id,
            description: self.description,
            metadata,
            webhook_url: self.webhook_url,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn parse_status(s: &str) -> Result<PaymentStatus, StorageError> {
    match s {
        "pending" => Ok(PaymentStatus::Pending),
        "processing" => Ok(PaymentStatus::Processing),
        "completed" => Ok(PaymentStatus::Completed),
        "failed" => Ok(PaymentStatus::Failed),
        "refunded" => Ok(PaymentStatus::Refunded),
        "partially_refunded" => Ok(PaymentStatus::PartiallyRefunded),
        other => Err(StorageError::NotFound(format!("unknown payment status {other:?}"))),
    }
}

pub fn status_str(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Pending => "pending",
        PaymentStatus::Processing => "processing",
        PaymentStatus::Completed => "completed",
        PaymentStatus::Failed => "failed",
        PaymentStatus::Refunded => "refunded",
        PaymentStatus::PartiallyRefunded => "partially_refunded",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

/// Executor-generic insert so the charge saga's persist step can run this
/// in the same transaction as its initial transaction row and audit entry
/// (mirrors `audit::insert`'s pattern).
async fn insert_payment_via<'c, E>(executor: E, payment: &Payment) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let metadata = JsonValue::Object(payment.metadata.clone().into_iter().collect());
    sqlx::query(
        r#"
        INSERT INTO payments
            (id, external_id, merchant_id, amount, currency, status, provider,
             provider_transaction_id, description, metadata, webhook_url,
             created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(payment.id)
    .bind(&payment.external_id)
    .bind(&payment.merchant_id)
    .bind(payment.amount.as_decimal())
    .bind(payment.amount.currency())
    .bind(status_str(payment.status))
    .bind(&payment.provider)
    .bind(&payment.provider_transaction_id)
    .bind(&payment.description)
    .bind(&metadata)
    .bind(&payment.webhook_url)
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .execute(executor)
    .await
    .map(|_| ())
}

impl Storage {
    pub async fn insert_payment(&self, payment: &Payment) -> Result<(), StorageError> {
        self.note(insert_payment_via(&self.pool, payment).await)
    }

    /// Same insert, scoped to an already-open transaction (spec.md 4.7
    /// step 1: payment row, initial transaction row, and creation audit
    /// all commit or roll back together).
    pub async fn insert_payment_tx(
        tx: &mut Transaction<'static, Postgres>,
        payment: &Payment,
    ) -> Result<(), StorageError> {
        insert_payment_via(&mut **tx, payment).await.map_err(StorageError::Database)
    }

    pub async fn get_payment(&self, id: Uuid, merchant_id: &str) -> Result<Payment, StorageError> {
        let row: Option<PaymentRow> = self.note(
            sqlx::query_as(
                "SELECT id, external_id, merchant_id, amount, currency, status, provider, \
                 provider_transaction_id, description, metadata, webhook_url, created_at, updated_at \
                 FROM payments WHERE id = $1 AND merchant_id = $2",
            )
            .bind(id)
            .bind(merchant_id)
            .fetch_optional(&self.pool)
            .await,
        )?;
        row.ok_or_else(|| StorageError::NotFound(format!("payment {id}")))?
            .into_payment()
    }

    pub async fn find_payment_by_provider_tx(
        &self,
        provider: &str,
        provider_transaction_id: &str,
    ) -> Result<Option<Payment>, StorageError> {
        let row: Option<PaymentRow> = self.note(
            sqlx::query_as(
                "SELECT id, external_id, merchant_id, amount, currency, status, provider, \
                 provider_transaction_id, description, metadata, webhook_url, created_at, updated_at \
                 FROM payments WHERE provider = $1 AND provider_transaction_id = $2",
            )
            .bind(provider)
            .bind(provider_transaction_id)
            .fetch_optional(&self.pool)
            .await,
        )?;
        row.map(PaymentRow::into_payment).transpose()
    }

    pub async fn list_payments(
        &self,
        merchant_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Payment>, Pagination), StorageError> {
        let rows: Vec<PaymentRow> = self.note(
            sqlx::query_as(
                "SELECT id, external_id, merchant_id, amount, currency, status, provider, \
                 provider_transaction_id, description, metadata, webhook_url, created_at, updated_at \
                 FROM payments WHERE merchant_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(merchant_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await,
        )?;
        let total: i64 = self.note(
            sqlx::query("SELECT COUNT(*) AS count FROM payments WHERE merchant_id = $1")
                .bind(merchant_id)
                .fetch_one(&self.pool)
                .await
                .map(|row: PgRow| row.get("count")),
        )?;
        let payments = rows
            .into_iter()
            .map(PaymentRow::into_payment)
            .collect::<Result<Vec<_>, _>>()?;
        let has_more = offset + (payments.len() as i64) < total;
        Ok((
            payments,
            Pagination { total, limit, offset, has_more },
        ))
    }

    /// Load a payment with `SELECT ... FOR UPDATE` inside an existing
    /// transaction, for the reconciliation and refund row-lock paths
    /// (spec.md 4.7/4.8).
    pub async fn get_payment_for_update(
        tx: &mut Transaction<'static, Postgres>,
        id: Uuid,
    ) -> Result<Payment, StorageError> {
        let row: PaymentRow = sqlx::query_as(
            "SELECT id, external_id, merchant_id, amount, currency, status, provider, \
             provider_transaction_id, description, metadata, webhook_url, created_at, updated_at \
             FROM payments WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("payment {id}")))?;
        row.into_payment()
    }

    pub async fn update_payment_status(
        tx: &mut Transaction<'static, Postgres>,
        id: Uuid,
        status: PaymentStatus,
        provider_transaction_id: Option<&str>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE payments SET status = $2, provider_transaction_id = \
             COALESCE($3, provider_transaction_id), updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status_str(status))
        .bind(provider_transaction_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn insert_transaction(
        tx: &mut Transaction<'static, Postgres>,
        payment_id: Uuid,
        status: PaymentStatus,
        raw_provider_response: Option<JsonValue>,
        error_code: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO transactions (id, payment_id, status, raw_provider_response, \
             error_code, error_message, created_at) VALUES ($1, $2, $3, $4, $5, $6, now())",
        )
        .bind(Uuid::new_v4())
        .bind(payment_id)
        .bind(status_str(status))
        .bind(raw_provider_response)
        .bind(error_code)
        .bind(error_message)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn list_transactions(
        &self,
        payment_id: Uuid,
    ) -> Result<Vec<PaymentTransaction>, StorageError> {
        #[derive(FromRow)]
        struct Row {
            id: Uuid,
            payment_id: Uuid,
            status: String,
            raw_provider_response: Option<JsonValue>,
            error_code: Option<String>,
            error_message: Option<String>,
            created_at: DateTime<Utc>,
        }
        let rows: Vec<Row> = self.note(
            sqlx::query_as(
                "SELECT id, payment_id, status, raw_provider_response, error_code, error_message, \
                 created_at FROM transactions WHERE payment_id = $1 ORDER BY created_at ASC",
            )
            .bind(payment_id)
            .fetch_all(&self.pool)
            .await,
        )?;
        rows.into_iter()
            .map(|r| {
                Ok(PaymentTransaction {
                    id: r.id,
                    payment_id: r.payment_id,
                    status: parse_status(&r.status)?,
                    raw_provider_response: r.raw_provider_response,
                    error_code: r.error_code,
                    error_message: r.error_message,
                    created_at: r.created_at,
                })
            })
            .collect()
    }
}
