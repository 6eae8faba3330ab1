//! `GET /health`, `GET /ready` (spec.md section 6's supplemented liveness
//! and readiness probes). Neither requires `Idempotency-Key` handling or
//! merchant authentication — both are infrastructure-facing.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Response {
    let database_ok = sqlx::query("SELECT 1").execute(state.storage.pool()).await.is_ok();
    let redis_ok = state.cache.ping().await;

    let status = if database_ok && redis_ok { "healthy" } else { "unhealthy" };
    let code = if database_ok && redis_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        code,
        Json(serde_json::json!({
            "status": status,
            "checks": { "database": database_ok, "redis": redis_ok },
            "timestamp": chrono::Utc::now(),
        })),
    )
        .into_response()
}

/// Readiness additionally reports any open circuit breakers — a merchant
/// request routed to a provider whose breaker is open would fail
/// immediately, so the service should drop out of the load balancer's
/// rotation rather than accept traffic it cannot serve (spec.md 4.6).
pub async fn ready(State(state): State<AppState>) -> Response {
    let database_ok = sqlx::query("SELECT 1").execute(state.storage.pool()).await.is_ok();
    let redis_ok = state.cache.ping().await;
    let open_circuits = state.breakers.open_circuits();

    let ready = database_ok && redis_ok;
    let code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        code,
        Json(serde_json::json!({
            "status": if ready { "ready" } else { "not_ready" },
            "checks": { "database": database_ok, "redis": redis_ok },
            "open_circuits": open_circuits,
            "timestamp": chrono::Utc::now(),
        })),
    )
        .into_response()
}
