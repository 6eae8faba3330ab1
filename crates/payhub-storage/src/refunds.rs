use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

use payhub_types::{Money, Refund, RefundStatus};

use crate::error::StorageError;
use crate::Storage;

#[derive(Debug, FromRow)]
struct RefundRow {
    id: Uuid,
    payment_id: Uuid,
    amount: Decimal,
    status: String,
    reason: Option<String>,
    provider_refund_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RefundRow {
    fn into_refund(self, currency: &str) -> Result<Refund, StorageError> {
        Ok(Refund {
            id: self.id,
            payment_id: self.payment_id,
            amount: Money::parse(&self.amount.to_string(), currency)
                .map_err(|e| StorageError::NotFound(e.to_string()))?,
            status: parse_refund_status(&self.status)?,
            reason: self.reason,
            provider_refund_id: self.provider_refund_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn parse_refund_status(s: &str) -> Result<RefundStatus, StorageError> {
    match s {
        "pending" => Ok(RefundStatus::Pending),
        "completed" => Ok(RefundStatus::Completed),
        "failed" => Ok(RefundStatus::Failed),
        other => Err(StorageError::NotFound(format!("unknown refund status {other:?}"))),
    }
}

fn refund_status_str(status: RefundStatus) -> &'static str {
    match status {
        RefundStatus::Pending => "pending",
        RefundStatus::Completed => "completed",
        RefundStatus::Failed => "failed",
    }
}

impl Storage {
    pub async fn insert_refund(
        tx: &mut Transaction<'static, Postgres>,
        payment_id: Uuid,
        amount: &Money,
        reason: Option<&str>,
    ) -> Result<Refund, StorageError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO refunds (id, payment_id, amount, status, reason, created_at, updated_at) \
             VALUES ($1, $2, $3, 'pending', $4, $5, $5)",
        )
        .bind(id)
        .bind(payment_id)
        .bind(amount.as_decimal())
        .bind(reason)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(Refund {
            id,
            payment_id,
            amount: *amount,
            status: RefundStatus::Pending,
            reason: reason.map(str::to_string),
            provider_refund_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn update_refund_status(
        tx: &mut Transaction<'static, Postgres>,
        id: Uuid,
        status: RefundStatus,
        provider_refund_id: Option<&str>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE refunds SET status = $2, provider_refund_id = \
             COALESCE($3, provider_refund_id), updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(refund_status_str(status))
        .bind(provider_refund_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Sum of refunds in `status` for `payment_id`, in the payment's
    /// currency. Used for the amount-conservation check in spec.md 4.8.
    pub async fn sum_refunds(
        tx: &mut Transaction<'static, Postgres>,
        payment_id: Uuid,
        status: RefundStatus,
        currency: &str,
    ) -> Result<Money, StorageError> {
        let total: Option<Decimal> = sqlx::query_scalar(
            "SELECT SUM(amount) FROM refunds WHERE payment_id = $1 AND status = $2",
        )
        .bind(payment_id)
        .bind(refund_status_str(status))
        .fetch_one(&mut **tx)
        .await?;
        let total = total.unwrap_or(Decimal::ZERO);
        Money::parse(&total.to_string(), currency).map_err(|e| StorageError::NotFound(e.to_string()))
    }

    /// All refunds for a payment, newest first, in the payment's currency
    /// (spec.md 6's `GET /payments/:id` embeds these).
    pub async fn list_refunds(
        &self,
        payment_id: Uuid,
        currency_of_payment: &str,
    ) -> Result<Vec<Refund>, StorageError> {
        let rows: Vec<RefundRow> = self.note(
            sqlx::query_as(
                "SELECT id, payment_id, amount, status, reason, provider_refund_id, created_at, \
                 updated_at FROM refunds WHERE payment_id = $1 ORDER BY created_at DESC",
            )
            .bind(payment_id)
            .fetch_all(&self.pool)
            .await,
        )?;
        rows.into_iter().map(|r| r.into_refund(currency_of_payment)).collect()
    }

    pub async fn get_refund(&self, id: Uuid, currency_of_payment: &str) -> Result<Refund, StorageError> {
        let row: Option<RefundRow> = self.note(
            sqlx::query_as(
                "SELECT id, payment_id, amount, status, reason, provider_refund_id, created_at, \
                 updated_at FROM refunds WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await,
        )?;
        row.ok_or_else(|| StorageError::NotFound(format!("refund {id}")))?
            .into_refund(currency_of_payment)
    }

    /// Merchant-scoped lookup for `GET /refunds/:id` (spec.md 6): joins to
    /// the owning payment for both its currency (refunds carry no
    /// currency column of their own) and the ownership check in the same
    /// query, so a refund owned by another merchant reads back as
    /// `NotFound`, not a separate authorization error (spec.md 7's
    /// enumeration-avoidance rule).
    pub async fn get_refund_for_merchant(
        &self,
        id: Uuid,
        merchant_id: &str,
    ) -> Result<Refund, StorageError> {
        let row: Option<RefundWithCurrencyRow> = self.note(
            sqlx::query_as(
                "SELECT r.id, r.payment_id, r.amount, r.status, r.reason, r.provider_refund_id, \
                 r.created_at, r.updated_at, p.currency \
                 FROM refunds r JOIN payments p ON p.id = r.payment_id \
                 WHERE r.id = $1 AND p.merchant_id = $2",
            )
            .bind(id)
            .bind(merchant_id)
            .fetch_optional(&self.pool)
            .await,
        )?;
        row.ok_or_else(|| StorageError::NotFound(format!("refund {id}")))?.into_refund()
    }
}

#[derive(Debug, FromRow)]
struct RefundWithCurrencyRow {
    id: Uuid,
    payment_id: Uuid,
    amount: Decimal,
    status: String,
    reason: Option<String>,
    provider_refund_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    currency: String,
}

impl RefundWithCurrencyRow {
    fn into_refund(self) -> Result<Refund, StorageError> {
        Ok(Refund {
            id: self.id,
            payment_id: self.payment_id,
            amount: Money::parse(&self.amount.to_string(), &self.currency)
                .map_err(|e| StorageError::NotFound(e.to_string()))?,
            status: parse_refund_status(&self.status)?,
            reason: self.reason,
            provider_refund_id: self.provider_refund_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
