//! # PayHub API
//!
//! The HTTP surface (spec.md section 6): request/response DTOs, the
//! `X-API-Key` and request-id middleware, and the `/api/v1` router that
//! wires handlers to [`AppState`]. The router and request-validation
//! layer are otherwise out of scope per spec.md section 1 — this crate
//! owns only enough of it to make the core reachable over HTTP.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod idempotency;
pub mod middleware;
pub mod state;

use axum::middleware::from_fn;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Builds the full `/api/v1` router plus unauthenticated `/health` and
/// `/ready` probes. `/webhooks/:provider` is deliberately outside the
/// `require_api_key` layer — the provider signature is its credential,
/// not a merchant API key (spec.md section 6).
pub fn router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/payments", post(handlers::payments::create_payment).get(handlers::payments::list_payments))
        .route("/payments/:id", get(handlers::payments::get_payment))
        .route("/payments/:id/refunds", post(handlers::refunds::create_refund))
        .route("/payments/:id/refundable", get(handlers::refunds::get_refundable))
        .route("/refunds/:id", get(handlers::refunds::get_refund))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_api_key));

    let unauthenticated = Router::new()
        .route("/webhooks/:provider", post(handlers::webhooks::receive_webhook))
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready));

    let api_v1 = Router::new().merge(authenticated).merge(unauthenticated);

    // spec.md section 6 lists `/health` and `/ready` as bare paths (not
    // under `/api/v1`), alongside the versioned resource routes.
    Router::new()
        .nest("/api/v1", api_v1)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .layer(from_fn(middleware::propagate_request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
