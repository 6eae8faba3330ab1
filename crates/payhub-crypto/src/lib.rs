//! # PayHub Crypto
//!
//! HMAC-SHA256 signing and constant-time verification, API key hashing,
//! and random identifier generation (spec.md section 4.2).

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256(payload, secret), rendered as lowercase hex.
pub fn hmac_sha256_hex(payload: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Recompute HMAC-SHA256 over `payload` and compare it against `signature`
/// (lowercase hex) in constant time regardless of length difference.
pub fn verify_hmac_sha256_hex(payload: &[u8], signature: &str, secret: &[u8]) -> bool {
    let expected = hmac_sha256_hex(payload, secret);
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

/// Constant-time byte comparison regardless of length difference: always
/// hashes both sides into a fixed-width digest before comparing, so
/// differing lengths never short-circuit the timing behavior.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let da = Sha256::digest(a);
    let db = Sha256::digest(b);
    let lengths_match = (a.len() as u64).ct_eq(&(b.len() as u64));
    let digests_match = da.ct_eq(&db);
    bool::from(lengths_match & digests_match)
}

/// `"sha256:" + hex(SHA256(key))` — the only form an API key is ever
/// persisted in.
pub fn hash_api_key(key: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(key.as_bytes())))
}

/// `"sk_live_" + base64url(24 random bytes)`.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "sk_live_{}",
        base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
    )
}

/// hex(16 random bytes) — a short opaque identifier (not a UUID).
pub fn generate_short_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A fresh 128-bit entity identifier, rendered canonically (UUID v4 is the
/// canonical on-disk representation per spec.md's ambiguity note in
/// section 9; any `pay_<...>` rendering is a presentation concern layered
/// on top, not implemented here).
pub fn generate_entity_id() -> uuid::Uuid {
    uuid::Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let secret = b"whsec_test";
        let payload = b"hello world";
        let sig = hmac_sha256_hex(payload, secret);
        assert!(verify_hmac_sha256_hex(payload, &sig, secret));
    }

    #[test]
    fn verify_rejects_wrong_payload() {
        let secret = b"whsec_test";
        let sig = hmac_sha256_hex(b"payload-a", secret);
        assert!(!verify_hmac_sha256_hex(b"payload-b", &sig, secret));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let sig = hmac_sha256_hex(b"payload", b"secret-a");
        assert!(!verify_hmac_sha256_hex(b"payload", &sig, b"secret-b"));
    }

    #[test]
    fn constant_time_eq_handles_different_lengths() {
        assert!(!constant_time_eq(b"short", b"a much longer string"));
        assert!(constant_time_eq(b"same", b"same"));
    }

    #[test]
    fn api_key_hash_has_algorithm_prefix() {
        let hash = hash_api_key("sk_live_abc123");
        assert!(hash.starts_with("sha256:"));
        assert_eq!(hash.len(), "sha256:".len() + 64);
    }

    #[test]
    fn generated_api_key_has_prefix() {
        let key = generate_api_key();
        assert!(key.starts_with("sk_live_"));
    }

    #[test]
    fn short_id_is_32_hex_chars() {
        let id = generate_short_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn entity_ids_are_unique() {
        assert_ne!(generate_entity_id(), generate_entity_id());
    }
}
