//! Resolves `X-API-Key` to a `merchant_id` attribution (spec.md section
//! 6). Real API-key issuance and permission checks belong to the
//! out-of-scope external auth collaborator (spec.md section 1); this is
//! the development stand-in SPEC_FULL.md section 15 calls for, looking
//! the hashed key up in the `api_keys` table this workspace's own
//! migration creates.

use axum::extract::{Request, State};
use axum::http::header::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use payhub_types::PayhubError;

use crate::error::ApiError;
use crate::state::AppState;

/// The merchant attribution carried on every authenticated request,
/// inserted into the request's extensions by [`require_api_key`].
#[derive(Debug, Clone)]
pub struct MerchantId(pub String);

fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    headers.get("x-api-key").and_then(|v| v.to_str().ok())
}

pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(raw_key) = extract_api_key(request.headers()) else {
        return Err(PayhubError::Unauthorized("missing X-API-Key header".to_string()).into());
    };

    let key_hash = payhub_crypto::hash_api_key(raw_key);
    let row = state
        .storage
        .find_api_key_by_hash(&key_hash)
        .await
        .map_err(PayhubError::from)?
        .ok_or_else(|| PayhubError::Unauthorized("invalid API key".to_string()))?;

    if !row.active {
        return Err(PayhubError::Forbidden("API key is inactive".to_string()).into());
    }

    // Best-effort; a stale last_used_at is not worth failing the request over.
    if let Err(e) = state.storage.touch_api_key_last_used(row.id).await {
        tracing::warn!(error = %e, "failed to update api key last_used_at");
    }

    request.extensions_mut().insert(MerchantId(row.merchant_id));
    Ok(next.run(request).await)
}
