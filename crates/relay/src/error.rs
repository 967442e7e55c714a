//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use outbox::OutboxError;

/// Errors surfaced by the relay's HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("outbox unavailable: {0}")]
    Outbox(#[from] OutboxError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Outbox(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        tracing::warn!(error = %self, "health check failed");

        let body = serde_json::json!({ "status": "unavailable", "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
