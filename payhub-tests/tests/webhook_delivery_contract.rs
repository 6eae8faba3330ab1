//! Cross-crate webhook contract (spec.md sections 4.9 and 8's
//! "signature round-trip" property): URL validation from `payhub-webhooks`
//! combined with the HMAC primitives from `payhub-crypto`, exercised the
//! way `WebhookSender::enqueue`/`verify_signature` compose them rather
//! than testing either crate's internals in isolation.

use chrono::Utc;
use payhub_webhooks::{url_validation, verify_signature};

fn sign(secret: &str, ts: i64, payload: &[u8]) -> String {
    let mut signed = format!("{ts}.").into_bytes();
    signed.extend_from_slice(payload);
    format!("t={ts},v1={}", payhub_crypto::hmac_sha256_hex(&signed, secret.as_bytes()))
}

#[test]
fn verify_round_trips_for_matching_secret_and_payload() {
    let secret = "whsec_live_abc123";
    let payload = br#"{"event_type":"payment.completed","payment_id":"p_1"}"#;
    let header = sign(secret, Utc::now().timestamp(), payload);
    assert!(verify_signature(secret, &header, payload));
}

#[test]
fn verify_fails_for_a_different_payload() {
    let secret = "whsec_live_abc123";
    let ts = Utc::now().timestamp();
    let header = sign(secret, ts, br#"{"event_type":"payment.completed"}"#);
    assert!(!verify_signature(secret, &header, br#"{"event_type":"payment.failed"}"#));
}

#[test]
fn verify_fails_for_a_different_secret() {
    let payload = b"payload-bytes";
    let ts = Utc::now().timestamp();
    let header = sign("whsec_live_abc123", ts, payload);
    assert!(!verify_signature("whsec_live_xyz789", &header, payload));
}

#[test]
fn verify_rejects_a_header_older_than_300_seconds() {
    let secret = "whsec_live_abc123";
    let payload = b"payload-bytes";
    let stale_ts = Utc::now().timestamp() - 301;
    let header = sign(secret, stale_ts, payload);
    assert!(!verify_signature(secret, &header, payload));
}

#[test]
fn enqueue_time_validation_rejects_ssrf_candidates_regardless_of_signature_validity() {
    // Every one of these would otherwise carry a perfectly valid
    // signature; the destination itself must still be rejected before any
    // HTTP call is attempted (spec.md 4.9's SSRF rules).
    let deny_listed = [
        "https://localhost/hook",
        "https://127.0.0.1/hook",
        "https://169.254.169.254/latest/meta-data",
        "https://internal-service.internal/hook",
        "https://billing.local/hook",
        "https://10.0.0.5/hook",
        "https://192.168.1.1/hook",
        "http://example.com/hook", // plain http rejected outside development
    ];
    for url in deny_listed {
        assert!(
            url_validation::validate(url, false).is_err(),
            "expected {url} to be rejected in production mode"
        );
    }
}

#[test]
fn enqueue_time_validation_allows_https_public_destinations() {
    assert!(url_validation::validate("https://merchant.example.com/webhooks/payhub", false).is_ok());
}

#[test]
fn development_mode_allows_http_but_still_denies_private_hosts() {
    assert!(url_validation::validate("http://merchant.example.com/webhooks/payhub", true).is_ok());
    assert!(url_validation::validate("http://127.0.0.1/hook", true).is_err());
}
