//! Integration tests for the relay's HTTP surface.

use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use event_store::{AggregateId, EventEnvelope, Version};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{
    InMemoryOutboxStore, InMemoryQueue, OutboxPublisher, OutboxRecord, OutboxStore,
    PublisherConfig, RetryPolicy,
};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn record(event_type: &str) -> OutboxRecord {
    let event = EventEnvelope::builder()
        .aggregate_id(AggregateId::new())
        .aggregate_type("Product")
        .event_type(event_type)
        .version(Version::first())
        .payload_raw(serde_json::json!({}))
        .build();
    OutboxRecord::from_event(&event, Utc::now())
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn health_reports_outbox_counts() {
    let store = InMemoryOutboxStore::new(RetryPolicy::default());
    store
        .add(vec![record("product.created"), record("product.price-updated")])
        .await
        .unwrap();

    let app = relay::create_app(store, get_metrics_handle());
    let (status, json) = get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["outbox"]["pending"], 2);
    assert_eq!(json["outbox"]["published"], 0);
    assert_eq!(json["outbox"]["failed"], 0);
}

#[tokio::test]
async fn health_reflects_published_records() {
    let store = InMemoryOutboxStore::new(RetryPolicy::default());
    store
        .add(vec![record("product.created"), record("product.deactivated")])
        .await
        .unwrap();

    let queue = InMemoryQueue::new();
    let publisher = OutboxPublisher::new(store.clone(), queue.clone(), PublisherConfig::default());
    publisher.publish_batch().await.unwrap();
    assert_eq!(queue.total_jobs().await, 2);

    let app = relay::create_app(store, get_metrics_handle());
    let (status, json) = get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outbox"]["pending"], 0);
    assert_eq!(json["outbox"]["published"], 2);
}

#[tokio::test]
async fn health_is_unavailable_when_outbox_cannot_be_read() {
    let store = InMemoryOutboxStore::new(RetryPolicy::default());
    store.set_unavailable(true);

    let app = relay::create_app(store, get_metrics_handle());
    let (status, json) = get_json(app, "/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "unavailable");
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn metrics_endpoint_exposes_outbox_gauges() {
    let store = InMemoryOutboxStore::new(RetryPolicy::default());
    store.add(vec![record("product.created")]).await.unwrap();

    let app = relay::create_app(store, get_metrics_handle());
    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("outbox_records"));
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let store = InMemoryOutboxStore::new(RetryPolicy::default());
    let app = relay::create_app(store, get_metrics_handle());

    let response = app
        .oneshot(Request::builder().uri("/orders").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
