//! A deterministic, stripe-shaped reference provider.
//!
//! Not an integration with the real processor — spec.md section 1 treats
//! providers as opaque remote services, so this crate ships a fake whose
//! behavior is pinned to the exact amounts named in spec.md section 8's
//! end-to-end scenarios: `100.99` declines, `100.50` returns `pending`,
//! everything else completes. Signature header format: `t=<unix
//! seconds>,v1=<hex>`, the same shape outbound webhooks use (spec.md 4.9).

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use payhub_crypto::{generate_short_id, verify_hmac_sha256_hex};
use payhub_types::PaymentStatus;

use crate::{ChargeRequest, ChargeResponse, ParsedWebhook, Provider, RefundRequest, RefundResponse};

/// Headers older than this are rejected regardless of provider (spec.md
/// 4.11: "both reject headers older than 300s").
pub const SIGNATURE_MAX_AGE_SECS: i64 = 300;

/// Stateless: the webhook secret used to verify a given delivery is
/// supplied per-call (spec.md 4.11's `verifyWebhookSignature(bytes,
/// header, secret)`), not cached on the provider value, so a single
/// `Arc<StripeLikeProvider>` can be shared across every merchant using
/// this provider regardless of per-merchant secret rotation.
pub struct StripeLikeProvider;

impl StripeLikeProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StripeLikeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for StripeLikeProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn process_payment(&self, request: ChargeRequest) -> ChargeResponse {
        let transaction_id = format!("ch_{}", generate_short_id());
        let decimal = request.amount.as_decimal();

        if decimal == "100.99".parse().unwrap() {
            return ChargeResponse {
                success: false,
                transaction_id: Some(transaction_id.clone()),
                status: PaymentStatus::Failed,
                raw_response: json!({
                    "id": transaction_id,
                    "status": "failed",
                    "error": { "code": "card_declined" },
                }),
                error_code: Some("card_declined".to_string()),
                error_message: Some("Your card was declined.".to_string()),
            };
        }

        if decimal == "100.50".parse().unwrap() {
            return ChargeResponse {
                success: true,
                transaction_id: Some(transaction_id.clone()),
                status: PaymentStatus::Pending,
                raw_response: json!({ "id": transaction_id, "status": "pending" }),
                error_code: None,
                error_message: None,
            };
        }

        ChargeResponse {
            success: true,
            transaction_id: Some(transaction_id.clone()),
            status: PaymentStatus::Completed,
            raw_response: json!({ "id": transaction_id, "status": "succeeded" }),
            error_code: None,
            error_message: None,
        }
    }

    async fn process_refund(&self, request: RefundRequest) -> RefundResponse {
        let refund_id = format!("re_{}", generate_short_id());
        RefundResponse {
            success: true,
            refund_id: Some(refund_id.clone()),
            status: PaymentStatus::Completed,
            raw_response: json!({
                "id": refund_id,
                "charge": request.provider_transaction_id,
                "status": "succeeded",
            }),
            error_code: None,
            error_message: None,
        }
    }

    fn parse_webhook(&self, payload: &[u8], _signature: Option<&str>) -> Option<ParsedWebhook> {
        let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
        let event_type = value.get("type")?.as_str()?.to_string();
        let data = value.get("data")?.get("object")?;
        let transaction_id = data.get("id")?.as_str()?.to_string();
        let status = match data.get("status")?.as_str()? {
            "succeeded" => PaymentStatus::Completed,
            "pending" => PaymentStatus::Pending,
            _ => PaymentStatus::Failed,
        };
        Some(ParsedWebhook { event_type, transaction_id, status, raw_payload: value })
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str, secret: &str) -> bool {
        verify_stripe_signature(payload, signature, secret, Utc::now().timestamp())
    }
}

fn verify_stripe_signature(payload: &[u8], header: &str, secret: &str, now: i64) -> bool {
    let mut ts: Option<i64> = None;
    let mut v1: Option<&str> = None;
    for part in header.split(',') {
        if let Some(rest) = part.strip_prefix("t=") {
            ts = rest.parse().ok();
        } else if let Some(rest) = part.strip_prefix("v1=") {
            v1 = Some(rest);
        }
    }
    let (Some(ts), Some(v1)) = (ts, v1) else { return false };
    if (now - ts).abs() > SIGNATURE_MAX_AGE_SECS {
        return false;
    }
    let signed_payload = [ts.to_string().as_bytes(), b".", payload].concat();
    verify_hmac_sha256_hex(&signed_payload, v1, secret.as_bytes())
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
        let p = StripeLikeProvider::new();
        let r = p.process_payment(req("100.99")).await;
        assert!(!r.success);
        assert_eq!(r.status, PaymentStatus::Failed);
        assert_eq!(r.error_code.as_deref(), Some("card_declined"));
    }

    #[tokio::test]
    async fn pends_the_spec_amount() {
        let p = StripeLikeProvider::new();
        let r = p.process_payment(req("100.50")).await;
        assert!(r.success);
        assert_eq!(r.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn completes_everything_else() {
        let p = StripeLikeProvider::new();
        let r = p.process_payment(req("100.00")).await;
        assert!(r.success);
        assert_eq!(r.status, PaymentStatus::Completed);
        assert!(r.transaction_id.unwrap().starts_with("ch_"));
    }

    #[test]
    fn rejects_signature_older_than_300s() {
        let secret = "whsec_test";
        let payload = b"{}";
        let old_ts = Utc::now().timestamp() - 301;
        let signed = [old_ts.to_string().as_bytes(), b".", payload as &[u8]].concat();
        let sig = payhub_crypto::hmac_sha256_hex(&signed, secret.as_bytes());
        let header = format!("t={old_ts},v1={sig}");
        assert!(!verify_stripe_signature(payload, &header, secret, Utc::now().timestamp()));
    }

    #[test]
    fn accepts_fresh_valid_signature() {
        let secret = "whsec_test";
        let payload = b"{}";
        let now = Utc::now().timestamp();
        let signed = [now.to_string().as_bytes(), b".", payload as &[u8]].concat();
        let sig = payhub_crypto::hmac_sha256_hex(&signed, secret.as_bytes());
        let header = format!("t={now},v1={sig}");
        assert!(verify_stripe_signature(payload, &header, secret, now));
    }
}
