//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use outbox::OutboxStore;

use crate::AppState;

/// GET /metrics: refreshes the outbox backlog gauges, then renders every metric.
///
/// A failed backlog read leaves the gauges at their previous values.
pub async fn get<S: OutboxStore>(State(state): State<AppState<S>>) -> impl IntoResponse {
    match state.store.count_by_status().await {
        Ok(counts) => {
            metrics::gauge!("outbox_records", "status" => "pending").set(counts.pending as f64);
            metrics::gauge!("outbox_records", "status" => "failed").set(counts.failed as f64);
            metrics::gauge!("outbox_records", "status" => "published").set(counts.published as f64);
        }
        Err(error) => tracing::warn!(%error, "could not read outbox backlog"),
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}
