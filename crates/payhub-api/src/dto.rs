//! Wire-format response bodies (spec.md section 6): amounts render as
//! four-fractional-digit decimal strings and currencies as their own
//! field, never as the nested `Money` struct `payhub_types` uses
//! internally.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use payhub_refunds::Refundable;
use payhub_storage::Pagination;
use payhub_types::{Payment, Refund, Transaction};

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub amount: String,
    pub currency: String,
    pub provider: String,
    pub description: Option<String>,
    pub external_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRefundRequest {
    pub amount: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub amount: String,
    pub currency: String,
    pub status: &'static str,
    pub provider: String,
    pub provider_transaction_id: Option<String>,
    pub description: Option<String>,
    pub metadata: HashMap<String, JsonValue>,
    pub webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<TransactionResponse>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunds: Option<Vec<RefundResponse>>,
}

impl PaymentResponse {
    /// Builds the response from a payment row plus the most recent
    /// transaction's `error_code`, if any (spec.md section 7's "errorCode
    /// from provider surfaced" and section 8 scenario 2's decline body).
    pub fn from_payment_and_error(p: &Payment, error_code: Option<String>) -> Self {
        Self { error_code, ..Self::from(p) }
    }
}

impl From<&Payment> for PaymentResponse {
    fn from(p: &Payment) -> Self {
        Self {
            id: p.id,
            external_id: p.external_id.clone(),
            amount: p.amount.to_persisted_string(),
            currency: p.amount.currency().to_string(),
            status: payhub_storage::status_str(p.status),
            provider: p.provider.clone(),
            provider_transaction_id: p.provider_transaction_id.clone(),
            description: p.description.clone(),
            metadata: p.metadata.clone(),
            webhook_url: p.webhook_url.clone(),
            error_code: None,
            created_at: p.created_at,
            updated_at: p.updated_at,
            transactions: None,
            refunds: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub status: &'static str,
    pub raw_provider_response: Option<JsonValue>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Transaction> for TransactionResponse {
    fn from(t: &Transaction) -> Self {
        Self {
            id: t.id,
            payment_id: t.payment_id,
            status: payhub_storage::status_str(t.status),
            raw_provider_response: t.raw_provider_response.clone(),
            error_code: t.error_code.clone(),
            error_message: t.error_message.clone(),
            created_at: t.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub amount: String,
    pub currency: String,
    pub status: &'static str,
    pub reason: Option<String>,
    pub provider_refund_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Refund> for RefundResponse {
    fn from(r: &Refund) -> Self {
        Self {
            id: r.id,
            payment_id: r.payment_id,
            amount: r.amount.to_persisted_string(),
            currency: r.amount.currency().to_string(),
            status: refund_status_str(r.status),
            reason: r.reason.clone(),
            provider_refund_id: r.provider_refund_id.clone(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

fn refund_status_str(status: payhub_types::RefundStatus) -> &'static str {
    match status {
        payhub_types::RefundStatus::Pending => "pending",
        payhub_types::RefundStatus::Completed => "completed",
        payhub_types::RefundStatus::Failed => "failed",
    }
}

#[derive(Debug, Serialize)]
pub struct RefundableResponse {
    pub payment_amount: String,
    pub total_refunded: String,
    pub pending_refunds: String,
    pub available_for_refund: String,
}

impl From<Refundable> for RefundableResponse {
    fn from(r: Refundable) -> Self {
        Self {
            payment_amount: r.payment_amount.to_persisted_string(),
            total_refunded: r.total_refunded.to_persisted_string(),
            pending_refunds: r.pending_refunds.to_persisted_string(),
            available_for_refund: r.available_for_refund.to_persisted_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginationResponse {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

impl From<Pagination> for PaginationResponse {
    fn from(p: Pagination) -> Self {
        Self { total: p.total, limit: p.limit, offset: p.offset, has_more: p.has_more }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentListResponse {
    pub data: Vec<PaymentResponse>,
    pub pagination: PaginationResponse,
}
