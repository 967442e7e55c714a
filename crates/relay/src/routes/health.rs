//! Health check endpoint.

use axum::Json;
use axum::extract::State;
use outbox::{OutboxStore, StatusCounts};
use serde::Serialize;

use crate::AppState;
use crate::error::AppError;

#[derive(Serialize)]
pub struct OutboxHealth {
    pub pending: u64,
    pub published: u64,
    pub failed: u64,
}

impl From<StatusCounts> for OutboxHealth {
    fn from(counts: StatusCounts) -> Self {
        Self {
            pending: counts.pending,
            published: counts.published,
            failed: counts.failed,
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub outbox: OutboxHealth,
}

/// GET /health: reports outbox backlog, or 503 when the outbox cannot be read.
pub async fn check<S: OutboxStore>(
    State(state): State<AppState<S>>,
) -> Result<Json<HealthResponse>, AppError> {
    let counts = state.store.count_by_status().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        outbox: counts.into(),
    }))
}
