//! `POST|GET /payments`, `GET /payments/:id` (spec.md section 6).

use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use payhub_payments::NewCharge;
use payhub_types::{Money, PaymentStatus, PayhubError};

use crate::dto::{CreatePaymentRequest, ListQuery, PaginationResponse, PaymentListResponse, PaymentResponse, RefundResponse, TransactionResponse};
use crate::error::ApiResult;
use crate::idempotency::{guard, record_outcome, IdempotencyOutcome};
use crate::middleware::MerchantId;
use crate::state::AppState;

const PATH: &str = "/api/v1/payments";

/// A `Failed` terminal status renders as `200`, everything else as `201`
/// (spec.md 8's literal scenarios 1-3: only the decline scenario gets
/// `200` on a fresh, non-replay charge).
fn charge_status_code(status: PaymentStatus) -> u16 {
    if status == PaymentStatus::Failed { 200 } else { 201 }
}

pub async fn create_payment(
    State(state): State<AppState>,
    Extension(MerchantId(merchant_id)): Extension<MerchantId>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> ApiResult<Response> {
    let idempotency_key = match guard(&state, &headers, &merchant_id, &body, PATH, "POST").await? {
        IdempotencyOutcome::Replay { status, body } => return Ok(replay(status, body)),
        IdempotencyOutcome::Proceed(key) => key,
    };

    let outcome = run_charge(&state, &merchant_id, body).await;

    match outcome {
        Ok(charge) => {
            let status = charge_status_code(charge.payment.status);
            let body = serde_json::to_value(PaymentResponse::from_payment_and_error(
                &charge.payment,
                charge.error_code.clone(),
            ))
            .expect("PaymentResponse always serializes");
            record_outcome(&state, idempotency_key.as_deref(), &merchant_id, status, &body).await;
            Ok((StatusCode::from_u16(status).unwrap_or(StatusCode::CREATED), Json(body)).into_response())
        }
        Err(e) => {
            let status = e.status_code();
            let body = error_body(&e);
            record_outcome(&state, idempotency_key.as_deref(), &merchant_id, status, &body).await;
            Err(e.into())
        }
    }
}

/// Parses the body and runs the charge as a single fallible unit so every
/// failure mode — malformed JSON, a bad amount/currency, or the saga
/// itself — flows through `create_payment`'s one `match outcome` block and
/// is recorded against the claimed idempotency key, instead of an early
/// `?` stranding the claim in `processing` forever.
async fn run_charge(
    state: &AppState,
    merchant_id: &str,
    body: JsonValue,
) -> Result<payhub_payments::ChargeOutcome, PayhubError> {
    let req: CreatePaymentRequest = serde_json::from_value(body)
        .map_err(|e| PayhubError::Validation(format!("invalid request body: {e}")))?;
    let amount = Money::parse(&req.amount, &req.currency)?;
    let charge = NewCharge {
        merchant_id: merchant_id.to_string(),
        amount,
        provider: req.provider,
        description: req.description,
        external_id: req.external_id,
        metadata: req.metadata,
        webhook_url: req.webhook_url,
    };
    state.payments.charge(charge).await
}

fn error_body(e: &PayhubError) -> JsonValue {
    serde_json::json!({ "error": e.code().to_lowercase(), "message": e.to_string(), "code": e.code() })
}

fn replay(status: u16, body: JsonValue) -> Response {
    (StatusCode::from_u16(status).unwrap_or(StatusCode::OK), Json(body)).into_response()
}

pub async fn list_payments(
    State(state): State<AppState>,
    Extension(MerchantId(merchant_id)): Extension<MerchantId>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<PaymentListResponse>> {
    let (payments, pagination) = state.payments.list_payments(&merchant_id, query.limit, query.offset).await?;
    Ok(Json(PaymentListResponse {
        data: payments.iter().map(PaymentResponse::from).collect(),
        pagination: PaginationResponse::from(pagination),
    }))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Extension(MerchantId(merchant_id)): Extension<MerchantId>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PaymentResponse>> {
    let payment = state.payments.get_payment(&merchant_id, id).await?;
    let transactions = state.payments.list_transactions(id).await?;
    let refunds = state.storage.list_refunds(id, payment.amount.currency()).await.map_err(PayhubError::from)?;

    let error_code = transactions.last().and_then(|t| t.error_code.clone());
    let mut resp = PaymentResponse::from_payment_and_error(&payment, error_code);
    resp.transactions = Some(transactions.iter().map(TransactionResponse::from).collect());
    resp.refunds = Some(refunds.iter().map(RefundResponse::from).collect());
    Ok(Json(resp))
}
