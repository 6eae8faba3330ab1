//! `POST /webhooks/:provider` (spec.md section 6). Unauthenticated by
//! `require_api_key` — the provider signature is the only credential.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use payhub_types::PayhubError;

use crate::error::ApiResult;
use crate::state::AppState;

/// Verifies the provider signature before parsing anything out of the
/// body, returning `401` on a missing or invalid signature (spec.md 9's
/// redesign flag: a forged webhook must never reach the reconciliation
/// path). The single configured webhook secret stands in for a
/// per-provider secret store.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider_name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let provider = state.providers.get(&provider_name)?;

    let signature = headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| PayhubError::Unauthorized("missing webhook signature".to_string()))?;

    if !provider.verify_webhook_signature(&body, signature, &state.webhook_config.secret) {
        return Err(PayhubError::Unauthorized("invalid webhook signature".to_string()).into());
    }

    let Some(parsed) = provider.parse_webhook(&body, Some(signature)) else {
        return Ok((StatusCode::OK, Json(serde_json::json!({ "received": true, "processed": false }))).into_response());
    };

    state
        .payments
        .reconcile(provider.name(), &parsed.transaction_id, parsed.status, parsed.raw_payload)
        .await?;
    Ok((StatusCode::OK, Json(serde_json::json!({ "received": true }))).into_response())
}
