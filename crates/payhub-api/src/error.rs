//! Renders [`PayhubError`] as the `{error, message, code, details?}`
//! envelope (spec.md section 7). This is the only place in the workspace
//! a `PayhubError` is turned into an HTTP response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use payhub_types::PayhubError;

pub struct ApiError(pub PayhubError);

impl From<PayhubError> for ApiError {
    fn from(e: PayhubError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Server errors get a generic message; the real detail is logged,
        // not handed to the caller (spec.md 7: "server errors return a
        // generic message and an opaque request-id for support lookup").
        let message = if status.is_server_error() {
            tracing::error!(error = %self.0, "internal error");
            "an internal error occurred".to_string()
        } else {
            self.0.to_string()
        };

        let body = json!({
            "error": self.0.code().to_lowercase(),
            "message": message,
            "code": self.0.code(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
