//! # PayHub Providers
//!
//! The provider abstraction and registry (spec.md section 4.11): four
//! uniform operations — charge, refund, parse-webhook, verify-signature —
//! implemented per named external processor. The registry is a
//! case-insensitive name-to-provider map; an unknown name fails with
//! `PayhubError::Provider { code: "UNKNOWN_PROVIDER", .. }`.
//!
//! Two reference providers ship with this crate (`stripe_like`,
//! `paypal_like`), deterministic stand-ins that realize the exact amounts
//! named in spec.md section 8's end-to-end scenarios. They are named
//! generically because they do not integrate with the real processors —
//! spec.md section 1 treats providers as opaque remote services.

pub mod paypal_like;
pub mod registry;
pub mod stripe_like;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use payhub_types::{Money, PaymentStatus};

pub use registry::ProviderRegistry;

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub amount: Money,
    pub description: Option<String>,
    pub metadata: serde_json::Map<String, JsonValue>,
}

#[derive(Debug, Clone)]
pub struct ChargeResponse {
    pub success: bool,
    pub transaction_id: Option<String>,
    /// Restricted to `{pending, completed, failed}` per spec.md 4.11.
    pub status: PaymentStatus,
    pub raw_response: JsonValue,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub amount: Money,
    pub provider_transaction_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundResponse {
    pub success: bool,
    pub refund_id: Option<String>,
    pub status: PaymentStatus,
    pub raw_response: JsonValue,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedWebhook {
    pub event_type: String,
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub raw_payload: JsonValue,
}

/// A named external payment processor. Implementations normalize their
/// own status vocabulary to `{pending, completed, failed}` and reject
/// stale signature headers (section 4.11: both shipped providers reject
/// headers older than 300s, despite differing header formats).
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process_payment(&self, request: ChargeRequest) -> ChargeResponse;

    async fn process_refund(&self, request: RefundRequest) -> RefundResponse;

    fn parse_webhook(&self, payload: &[u8], signature: Option<&str>) -> Option<ParsedWebhook>;

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str, secret: &str) -> bool;
}
