//! # PayHub Idempotency
//!
//! The two-tier idempotency gate (spec.md section 4.5): cache-first reads,
//! persistence as the source of truth, a processing hand-off serialized by
//! an advisory lock on `(key, merchant)`, and request-fingerprint conflict
//! detection so a replayed key with a different body is rejected before
//! any side-effecting work runs.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use payhub_cache::Cache;
use payhub_storage::advisory_lock::in_advisory_locked_transaction;
use payhub_storage::Storage;
use payhub_types::{IdempotencyRecord, IdempotencyStatus, PayhubError};

/// Default time-to-live for a fresh idempotency record (spec.md 4.5).
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

fn cache_key(key: &str, merchant_id: &str) -> String {
    format!("idempotency:{merchant_id}:{key}")
}

fn lock_key(key: &str, merchant_id: &str) -> String {
    format!("idempotency:{key}:{merchant_id}")
}

/// SHA-256 of the canonical JSON serialization of `{body, path, method}`
/// (spec.md 4.5). Object keys are sorted recursively so that two callers
/// serializing semantically-equal bodies with different libraries — and
/// therefore different key orders — still hash to the same fingerprint.
pub fn fingerprint(body: &JsonValue, path: &str, method: &str) -> String {
    let canonical = serde_json::json!({
        "body": canonicalize(body),
        "path": path,
        "method": method,
    });
    let bytes = canonical_bytes(&canonical);
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}

/// Recursively sorts object keys so serialization is deterministic
/// regardless of insertion order.
fn canonicalize(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, JsonValue> = Default::default();
            for (k, v) in map {
                sorted.insert(k.clone(), canonicalize(v));
            }
            JsonValue::Object(sorted.into_iter().collect())
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn canonical_bytes(value: &JsonValue) -> Vec<u8> {
    serde_json::to_vec(value).expect("JsonValue serialization never fails")
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub exists: bool,
    pub processing: bool,
    pub cached_response: Option<JsonValue>,
    pub cached_status_code: Option<u16>,
}

impl CheckResult {
    fn absent() -> Self {
        Self { exists: false, processing: false, cached_response: None, cached_status_code: None }
    }
}

#[derive(Clone)]
pub struct IdempotencyEngine {
    storage: Storage,
    cache: Cache,
    ttl: Duration,
}

impl IdempotencyEngine {
    pub fn new(storage: Storage, cache: Cache, ttl: Duration) -> Self {
        Self { storage, cache, ttl }
    }

    fn require_matching_fingerprint(
        record: &IdempotencyRecord,
        expected_fingerprint: &str,
    ) -> Result<(), PayhubError> {
        if record.fingerprint != expected_fingerprint {
            return Err(PayhubError::IdempotencyConflict(format!(
                "key {:?} was already used with a different request",
                record.key
            )));
        }
        Ok(())
    }

    /// Cache-first lookup, falling back to persistence. Read-only — never
    /// mutates either tier, so a stale cache miss is resolved by
    /// `start_processing`'s own re-check under lock, not here.
    pub async fn check(
        &self,
        key: &str,
        merchant_id: &str,
        request_fingerprint: &str,
    ) -> Result<CheckResult, PayhubError> {
        if let Some(bytes) = self.cache.get(&cache_key(key, merchant_id)).await.map_err(PayhubError::from)? {
            let record: IdempotencyRecord = serde_json::from_slice(&bytes)
                .map_err(|e| PayhubError::Internal(format!("corrupt cache record: {e}")))?;
            Self::require_matching_fingerprint(&record, request_fingerprint)?;
            return Ok(self.result_from_record(&record));
        }

        match self.storage.get_idempotency_record(key, merchant_id).await.map_err(PayhubError::from)? {
            Some(record) => {
                Self::require_matching_fingerprint(&record, request_fingerprint)?;
                Ok(self.result_from_record(&record))
            }
            None => Ok(CheckResult::absent()),
        }
    }

    fn result_from_record(&self, record: &IdempotencyRecord) -> CheckResult {
        match record.status {
            IdempotencyStatus::Processing => CheckResult {
                exists: true,
                processing: true,
                cached_response: None,
                cached_status_code: None,
            },
            IdempotencyStatus::Completed => CheckResult {
                exists: true,
                processing: false,
                cached_response: record.response_body.clone(),
                cached_status_code: record.response_status_code,
            },
        }
    }

    /// Claims the `(key, merchant)` pair for the calling task under an
    /// advisory lock, inserting a `processing` row if none exists.
    /// Returns `None` when the caller won the claim and should proceed to
    /// run the saga; returns `Some(existing)` when a concurrent writer
    /// already holds (or has finished) it, so the caller lost the race and
    /// must not run the saga a second time (spec.md 4.5's "At-most-one
    /// processing" property) — branch on `existing.status` to tell an
    /// in-flight loser from one that can now replay a completed response.
    pub async fn start_processing(
        &self,
        key: &str,
        merchant_id: &str,
        request_fingerprint: &str,
        path: &str,
        method: &str,
    ) -> Result<Option<IdempotencyRecord>, PayhubError> {
        let expires_at = Utc::now() + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(24));
        let ttl = self.ttl;
        let key_owned = key.to_string();
        let merchant_owned = merchant_id.to_string();
        let fingerprint_owned = request_fingerprint.to_string();
        let path_owned = path.to_string();
        let method_owned = method.to_string();

        let outcome = in_advisory_locked_transaction(
            self.storage.pool(),
            &lock_key(key, merchant_id),
            move |mut tx| async move {
                let existing = payhub_storage::Storage::get_idempotency_record_locked(
                    &mut tx,
                    &key_owned,
                    &merchant_owned,
                )
                .await?;
                match existing {
                    Some(record) => Ok((Some(record), tx)),
                    None => {
                        payhub_storage::Storage::insert_processing_record(
                            &mut tx,
                            &key_owned,
                            &merchant_owned,
                            &fingerprint_owned,
                            &path_owned,
                            &method_owned,
                            expires_at,
                        )
                        .await?;
                        Ok((None, tx))
                    }
                }
            },
        )
        .await
        .map_err(PayhubError::from)?;

        if let Some(record) = outcome {
            Self::require_matching_fingerprint(&record, request_fingerprint)?;
            return Ok(Some(record));
        }

        let record = IdempotencyRecord {
            key: key.to_string(),
            merchant_id: merchant_id.to_string(),
            fingerprint: request_fingerprint.to_string(),
            path: path.to_string(),
            method: method.to_string(),
            status: IdempotencyStatus::Processing,
            response_body: None,
            response_status_code: None,
            created_at: Utc::now(),
            expires_at,
        };
        self.mirror_to_cache(&record, ttl).await?;
        Ok(None)
    }

    /// Updates the persistence row to `completed` and rewrites the cache
    /// entry, preserving the record's remaining TTL rather than resetting
    /// the clock to a fresh 24h.
    pub async fn complete(
        &self,
        key: &str,
        merchant_id: &str,
        response: &JsonValue,
        status_code: u16,
    ) -> Result<(), PayhubError> {
        self.storage
            .complete_idempotency_record(key, merchant_id, response, status_code)
            .await
            .map_err(PayhubError::from)?;

        let record = self
            .storage
            .get_idempotency_record(key, merchant_id)
            .await
            .map_err(PayhubError::from)?
            .ok_or_else(|| PayhubError::Internal(format!("idempotency record {key} vanished after completion")))?;

        let remaining = (record.expires_at - Utc::now()).to_std().unwrap_or(Duration::from_secs(0));
        self.mirror_to_cache(&record, remaining).await
    }

    /// Deletes the record from both tiers, for aborted requests that
    /// should be retryable (spec.md 4.5).
    pub async fn remove(&self, key: &str, merchant_id: &str) -> Result<(), PayhubError> {
        self.storage.delete_idempotency_record(key, merchant_id).await.map_err(PayhubError::from)?;
        self.cache.delete(&cache_key(key, merchant_id)).await.map_err(PayhubError::from)?;
        Ok(())
    }

    async fn mirror_to_cache(&self, record: &IdempotencyRecord, ttl: Duration) -> Result<(), PayhubError> {
        let bytes = serde_json::to_vec(record)
            .map_err(|e| PayhubError::Internal(format!("failed to serialize idempotency record: {e}")))?;
        self.cache
            .set_with_ttl(&cache_key(&record.key, &record.merchant_id), &bytes, ttl.max(Duration::from_secs(1)))
            .await
            .map_err(PayhubError::from)?;
        Ok(())
    }

    /// Exposes the record's expiry timestamp for callers computing a TTL
    /// outside this crate (e.g. tests asserting GC eligibility).
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod fingerprint_tests {
    use super::*;

    #[test]
    fn same_body_different_key_order_same_fingerprint() {
        let a = serde_json::json!({"amount": "100.00", "currency": "USD"});
        let b = serde_json::json!({"currency": "USD", "amount": "100.00"});
        assert_eq!(
            fingerprint(&a, "/payments", "POST"),
            fingerprint(&b, "/payments", "POST")
        );
    }

    #[test]
    fn different_body_different_fingerprint() {
        let a = serde_json::json!({"amount": "100.00"});
        let b = serde_json::json!({"amount": "200.00"});
        assert_ne!(
            fingerprint(&a, "/payments", "POST"),
            fingerprint(&b, "/payments", "POST")
        );
    }

    #[test]
    fn path_and_method_are_part_of_the_fingerprint() {
        let body = serde_json::json!({"amount": "100.00"});
        assert_ne!(
            fingerprint(&body, "/payments", "POST"),
            fingerprint(&body, "/payments", "GET")
        );
    }
}
