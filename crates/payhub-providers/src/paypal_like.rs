//! A deterministic, paypal-shaped reference provider. Same fake-provider
//! caveat as [`crate::stripe_like`]; its signature header format differs
//! (`ts=<unix seconds>;sig=<hex>` rather than `t=...,v1=...`) to exercise
//! the "differ in format, same 300s freshness rule" requirement of
//! spec.md section 4.11.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use payhub_crypto::{generate_short_id, verify_hmac_sha256_hex};
use payhub_types::PaymentStatus;

use crate::stripe_like::SIGNATURE_MAX_AGE_SECS;
use crate::{ChargeRequest, ChargeResponse, ParsedWebhook, Provider, RefundRequest, RefundResponse};

/// Stateless for the same reason as [`crate::stripe_like::StripeLikeProvider`]:
/// the verification secret travels per-call, not cached on the value.
pub struct PaypalLikeProvider;

impl PaypalLikeProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PaypalLikeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for PaypalLikeProvider {
    fn name(&self) -> &'static str {
        "paypal"
    }

    async fn process_payment(&self, request: ChargeRequest) -> ChargeResponse {
        let transaction_id = format!("PAY-{}", generate_short_id().to_uppercase());
        let decimal = request.amount.as_decimal();

        if decimal == "100.99".parse().unwrap() {
            return ChargeResponse {
                success: false,
                transaction_id: Some(transaction_id.clone()),
                status: PaymentStatus::Failed,
                raw_response: json!({
                    "id": transaction_id,
                    "state": "denied",
                    "error": { "name": "INSTRUMENT_DECLINED" },
                }),
                error_code: Some("card_declined".to_string()),
                error_message: Some("Instrument declined.".to_string()),
            };
        }

        if decimal == "100.50".parse().unwrap() {
            return ChargeResponse {
                success: true,
                transaction_id: Some(transaction_id.clone()),
                status: PaymentStatus::Pending,
                raw_response: json!({ "id": transaction_id, "state": "pending" }),
                error_code: None,
                error_message: None,
            };
        }

        ChargeResponse {
            success: true,
            transaction_id: Some(transaction_id.clone()),
            status: PaymentStatus::Completed,
            raw_response: json!({ "id": transaction_id, "state": "approved" }),
            error_code: None,
            error_message: None,
        }
    }

    async fn process_refund(&self, request: RefundRequest) -> RefundResponse {
        let refund_id = format!("RF-{}", generate_short_id().to_uppercase());
        RefundResponse {
            success: true,
            refund_id: Some(refund_id.clone()),
            status: PaymentStatus::Completed,
            raw_response: json!({
                "id": refund_id,
                "parent_payment": request.provider_transaction_id,
                "state": "completed",
            }),
            error_code: None,
            error_message: None,
        }
    }

    fn parse_webhook(&self, payload: &[u8], _signature: Option<&str>) -> Option<ParsedWebhook> {
        let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
        let event_type = value.get("event_type")?.as_str()?.to_string();
        let resource = value.get("resource")?;
        let transaction_id = resource.get("id")?.as_str()?.to_string();
        let status = match resource.get("state")?.as_str()? {
            "approved" | "completed" => PaymentStatus::Completed,
            "pending" => PaymentStatus::Pending,
            _ => PaymentStatus::Failed,
        };
        Some(ParsedWebhook { event_type, transaction_id, status, raw_payload: value })
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str, secret: &str) -> bool {
        verify_paypal_signature(payload, signature, secret, Utc::now().timestamp())
    }
}

fn verify_paypal_signature(payload: &[u8], header: &str, secret: &str, now: i64) -> bool {
    let mut ts: Option<i64> = None;
    let mut sig: Option<&str> = None;
    for part in header.split(';') {
        if let Some(rest) = part.strip_prefix("ts=") {
            ts = rest.parse().ok();
        } else if let Some(rest) = part.strip_prefix("sig=") {
            sig = Some(rest);
        }
    }
    let (Some(ts), Some(sig)) = (ts, sig) else { return false };
    if (now - ts).abs() > SIGNATURE_MAX_AGE_SECS {
        return false;
    }
    let signed_payload = [ts.to_string().as_bytes(), b":", payload].concat();
    verify_hmac_sha256_hex(&signed_payload, sig, secret.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use payhub_types::Money;

    fn req(amount: &str) -> ChargeRequest {
        ChargeRequest {
            amount: Money::parse(amount, "USD").unwrap(),
            description: None,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn declines_the_spec_amount() {
        let p = PaypalLikeProvider::new();
        let r = p.process_payment(req("100.99")).await;
        assert!(!r.success);
        assert_eq!(r.error_code.as_deref(), Some("card_declined"));
    }

    #[test]
    fn header_format_differs_from_stripe_but_same_freshness_rule() {
        let secret = "secret";
        let payload = b"{}";
        let old_ts = Utc::now().timestamp() - 301;
        let signed = [old_ts.to_string().as_bytes(), b":", payload as &[u8]].concat();
        let sig = payhub_crypto::hmac_sha256_hex(&signed, secret.as_bytes());
        let header = format!("ts={old_ts};sig={sig}");
        assert!(!verify_paypal_signature(payload, &header, secret, Utc::now().timestamp()));
    }
}
