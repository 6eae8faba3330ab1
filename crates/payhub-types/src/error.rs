//! The single error taxonomy shared across core crates (spec.md section 7).
//!
//! Leaf crates that talk to an external system define their own
//! `thiserror` enums and implement `From<LeafError> for PayhubError`, so
//! `?` composes across crate boundaries without per-call-site mapping.

use thiserror::Error;

use crate::money::MoneyError;

#[derive(Debug, Error)]
pub enum PayhubError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("idempotency conflict: {0}")]
    IdempotencyConflict(String),

    #[error("request is already being processed")]
    IdempotencyInFlight,

    #[error("rate limited")]
    RateLimited,

    #[error("provider error [{code}]: {message}")]
    Provider { code: String, message: String },

    #[error("circuit open for {0}")]
    CircuitOpen(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PayhubError {
    /// The HTTP status code this error kind maps to (spec.md section 7).
    pub fn status_code(&self) -> u16 {
        match self {
            PayhubError::Validation(_) => 400,
            PayhubError::Unauthorized(_) => 401,
            PayhubError::Forbidden(_) => 403,
            PayhubError::NotFound(_) => 404,
            PayhubError::IdempotencyConflict(_) | PayhubError::IdempotencyInFlight => 409,
            PayhubError::RateLimited => 429,
            PayhubError::Provider { .. } => 502,
            PayhubError::CircuitOpen(_) => 502,
            PayhubError::Internal(_) => 500,
        }
    }

    /// The machine-readable `code` field of the `{error, message, code,
    /// details?}` response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            PayhubError::Validation(_) => "VALIDATION_ERROR",
            PayhubError::Unauthorized(_) => "UNAUTHORIZED",
            PayhubError::Forbidden(_) => "FORBIDDEN",
            PayhubError::NotFound(_) => "NOT_FOUND",
            PayhubError::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            PayhubError::IdempotencyInFlight => "IDEMPOTENCY_IN_FLIGHT",
            PayhubError::RateLimited => "RATE_LIMITED",
            PayhubError::Provider { .. } => "PROVIDER_ERROR",
            PayhubError::CircuitOpen(_) => "CIRCUIT_OPEN",
            PayhubError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<MoneyError> for PayhubError {
    fn from(e: MoneyError) -> Self {
        PayhubError::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec_table() {
        assert_eq!(PayhubError::Validation("x".into()).status_code(), 400);
        assert_eq!(PayhubError::Unauthorized("x".into()).status_code(), 401);
        assert_eq!(PayhubError::Forbidden("x".into()).status_code(), 403);
        assert_eq!(PayhubError::NotFound("x".into()).status_code(), 404);
        assert_eq!(
            PayhubError::IdempotencyConflict("x".into()).status_code(),
            409
        );
        assert_eq!(PayhubError::IdempotencyInFlight.status_code(), 409);
        assert_eq!(PayhubError::RateLimited.status_code(), 429);
        assert_eq!(
            PayhubError::Provider { code: "x".into(), message: "y".into() }.status_code(),
            502
        );
        assert_eq!(PayhubError::CircuitOpen("x".into()).status_code(), 502);
        assert_eq!(PayhubError::Internal("x".into()).status_code(), 500);
    }
}
