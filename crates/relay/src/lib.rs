//! Outbox relay service.
//!
//! Drains the outbox into downstream queues in the background and exposes
//! `/health` and `/metrics` over HTTP.

pub mod config;
pub mod error;
pub mod queue;
pub mod routes;

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::OutboxStore;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub use config::{Config, LogFormat};
pub use queue::RedisQueue;

/// State shared by the HTTP handlers.
#[derive(Clone)]
pub struct AppState<S> {
    pub store: S,
    pub metrics: PrometheusHandle,
}

/// Creates the Axum application router.
pub fn create_app<S>(store: S, metrics: PrometheusHandle) -> Router
where
    S: OutboxStore + Clone + 'static,
{
    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/metrics", get(routes::metrics::get::<S>))
        .with_state(AppState { store, metrics })
        .layer(TraceLayer::new_for_http())
}

/// Installs the global tracing subscriber.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
