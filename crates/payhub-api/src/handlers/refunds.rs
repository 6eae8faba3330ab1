//! `POST /payments/:id/refunds`, `GET /payments/:id/refundable`, `GET
//! /refunds/:id` (spec.md section 6).

use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use payhub_types::PayhubError;

use crate::dto::{CreateRefundRequest, RefundResponse, RefundableResponse};
use crate::error::ApiResult;
use crate::idempotency::{guard, record_outcome, IdempotencyOutcome};
use crate::middleware::MerchantId;
use crate::state::AppState;

const PATH_PREFIX: &str = "/api/v1/payments";

pub async fn create_refund(
    State(state): State<AppState>,
    Extension(MerchantId(merchant_id)): Extension<MerchantId>,
    Path(payment_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> ApiResult<Response> {
    let path = format!("{PATH_PREFIX}/{payment_id}/refunds");
    let idempotency_key = match guard(&state, &headers, &merchant_id, &body, &path, "POST").await? {
        IdempotencyOutcome::Replay { status, body } => return Ok(replay(status, body)),
        IdempotencyOutcome::Proceed(key) => key,
    };

    let outcome = run_refund(&state, &merchant_id, payment_id, body).await;

    match outcome {
        Ok(refund) => {
            let status = 201u16;
            let body = serde_json::to_value(RefundResponse::from(&refund.refund))
                .expect("RefundResponse always serializes");
            record_outcome(&state, idempotency_key.as_deref(), &merchant_id, status, &body).await;
            Ok((StatusCode::CREATED, Json(body)).into_response())
        }
        Err(e) => {
            let status = e.status_code();
            let body = error_body(&e);
            record_outcome(&state, idempotency_key.as_deref(), &merchant_id, status, &body).await;
            Err(e.into())
        }
    }
}

/// Parses the body and runs the refund as a single fallible unit, for the
/// same reason `payhub_payments`'s charge handler does: a malformed body
/// must still release or complete the claimed idempotency key.
async fn run_refund(
    state: &AppState,
    merchant_id: &str,
    payment_id: Uuid,
    body: JsonValue,
) -> Result<payhub_refunds::RefundOutcome, PayhubError> {
    let req: CreateRefundRequest = serde_json::from_value(body)
        .map_err(|e| PayhubError::Validation(format!("invalid request body: {e}")))?;
    let payment = state.payments.get_payment(merchant_id, payment_id).await?;
    let amount = payhub_types::Money::parse(&req.amount, payment.amount.currency())?;
    state.refunds.create_refund(merchant_id, payment_id, amount, req.reason).await
}

fn error_body(e: &PayhubError) -> JsonValue {
    serde_json::json!({ "error": e.code().to_lowercase(), "message": e.to_string(), "code": e.code() })
}

fn replay(status: u16, body: JsonValue) -> Response {
    (StatusCode::from_u16(status).unwrap_or(StatusCode::OK), Json(body)).into_response()
}

pub async fn get_refundable(
    State(state): State<AppState>,
    Extension(MerchantId(merchant_id)): Extension<MerchantId>,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<Json<RefundableResponse>> {
    let refundable = state.refunds.refundable(&merchant_id, payment_id).await?;
    Ok(Json(RefundableResponse::from(refundable)))
}

pub async fn get_refund(
    State(state): State<AppState>,
    Extension(MerchantId(merchant_id)): Extension<MerchantId>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RefundResponse>> {
    let refund = state.storage.get_refund_for_merchant(id, &merchant_id).await.map_err(PayhubError::from)?;
    Ok(Json(RefundResponse::from(&refund)))
}
