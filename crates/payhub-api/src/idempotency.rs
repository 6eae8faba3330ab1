//! Shared `Idempotency-Key` handling for the create-style POST handlers
//! (spec.md section 6: "Optional `Idempotency-Key` header on
//! POST/PUT/PATCH"). Both `POST /payments` and `POST
//! /payments/:id/refunds` wrap their body-parsing and service call with
//! [`guard`]/[`record_outcome`] rather than duplicating the check ->
//! claim -> complete/remove dance inline.

use axum::http::HeaderMap;
use serde_json::Value as JsonValue;

use payhub_types::{IdempotencyStatus, PayhubError};

use crate::error::ApiResult;
use crate::state::AppState;

const MAX_IDEMPOTENCY_KEY_BYTES: usize = 256;

/// What the caller should do next: either a decision has already been
/// made for them (replay a stored response) or they've claimed the key
/// themselves and should run the operation and report back through
/// [`record_outcome`].
pub enum IdempotencyOutcome {
    Proceed(Option<String>),
    Replay { status: u16, body: JsonValue },
}

/// Checks a request's `Idempotency-Key` header (if present) against the
/// two-tier engine and, on a fresh key, claims it under the per-key
/// advisory lock (spec.md 4.5's "At-most-one processing"). A concurrent
/// loser surfaces as `409 IDEMPOTENCY_IN_FLIGHT` directly from here.
pub async fn guard(
    state: &AppState,
    headers: &HeaderMap,
    merchant_id: &str,
    body: &JsonValue,
    path: &str,
    method: &str,
) -> ApiResult<IdempotencyOutcome> {
    let Some(key) = headers.get("idempotency-key").and_then(|v| v.to_str().ok()) else {
        return Ok(IdempotencyOutcome::Proceed(None));
    };
    if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_BYTES {
        return Err(PayhubError::Validation("Idempotency-Key must be 1-256 bytes".to_string()).into());
    }
    let key = key.to_string();
    let fingerprint = payhub_idempotency::fingerprint(body, path, method);

    let check = state.idempotency.check(&key, merchant_id, &fingerprint).await?;
    if check.processing {
        return Err(PayhubError::IdempotencyInFlight.into());
    }
    if check.exists {
        return Ok(IdempotencyOutcome::Replay {
            status: check.cached_status_code.unwrap_or(200),
            body: check.cached_response.unwrap_or(JsonValue::Null),
        });
    }

    match state.idempotency.start_processing(&key, merchant_id, &fingerprint, path, method).await? {
        None => Ok(IdempotencyOutcome::Proceed(Some(key))),
        Some(existing) => match existing.status {
            IdempotencyStatus::Processing => Err(PayhubError::IdempotencyInFlight.into()),
            IdempotencyStatus::Completed => Ok(IdempotencyOutcome::Replay {
                status: existing.response_status_code.unwrap_or(200),
                body: existing.response_body.unwrap_or(JsonValue::Null),
            }),
        },
    }
}

/// Records the terminal outcome against a claimed key. Client errors
/// (4xx) and successes are stored so a byte-for-byte replay works
/// (spec.md 8's idempotent-replay property); server errors (5xx) release
/// the claim instead, since nothing useful happened and a retry should be
/// allowed to actually run the saga.
pub async fn record_outcome(state: &AppState, key: Option<&str>, merchant_id: &str, status: u16, body: &JsonValue) {
    let Some(key) = key else { return };
    let result = if status >= 500 {
        state.idempotency.remove(key, merchant_id).await
    } else {
        state.idempotency.complete(key, merchant_id, body, status).await
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, "failed to record idempotency outcome");
    }
}
