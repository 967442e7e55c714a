//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use common::TenantId;
use event_store::{
    AggregateId, AppendOptions, EventEnvelope, EventStore, EventStoreError, EventStoreExt,
    PostgresEventStore, PostgresSnapshotStore, Snapshot, SnapshotStore, StreamId, StreamRevision,
    Version,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresEventStore::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh pool with cleared tables
async fn get_test_pool() -> PgPool {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE events, snapshots, outbox")
        .execute(&pool)
        .await
        .unwrap();

    pool
}

fn stream_for(aggregate_id: AggregateId) -> StreamId {
    StreamId::new("catalog", "Product", 1, TenantId::new("acme"), aggregate_id)
}

fn create_test_event(aggregate_id: AggregateId, version: i64, event_type: &str) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("Product")
        .event_type(event_type)
        .version(Version::new(version))
        .payload_raw(serde_json::json!({"test": true}))
        .metadata("source", serde_json::json!("integration"))
        .build()
}

#[tokio::test]
#[serial]
async fn append_and_read_back() {
    let store = PostgresEventStore::new(get_test_pool().await);
    let aggregate_id = AggregateId::new();
    let stream = stream_for(aggregate_id);

    let result = store
        .append_to_stream(
            &stream,
            vec![
                create_test_event(aggregate_id, 0, "product.created"),
                create_test_event(aggregate_id, 1, "product.price-updated"),
            ],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();
    assert_eq!(result.next_expected_revision, StreamRevision(1));

    let events = store.read_stream(&stream, None).await.unwrap().into_events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].envelope.event_type, "product.created");
    assert_eq!(events[1].envelope.version, Version::new(1));
    assert_eq!(events[1].envelope.tenant_id, TenantId::new("acme"));
    assert_eq!(
        events[0].envelope.metadata.extra.get("source"),
        Some(&serde_json::json!("integration"))
    );
}

#[tokio::test]
#[serial]
async fn stale_expected_version_conflicts() {
    let store = PostgresEventStore::new(get_test_pool().await);
    let aggregate_id = AggregateId::new();
    let stream = stream_for(aggregate_id);

    store
        .append_to_stream(
            &stream,
            vec![create_test_event(aggregate_id, 0, "product.created")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let result = store
        .append_to_stream(
            &stream,
            vec![create_test_event(aggregate_id, 1, "product.deactivated")],
            AppendOptions::expect_new(),
        )
        .await;

    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { actual, .. }) if actual == Version::first()
    ));
    assert_eq!(store.stream_version(&stream).await.unwrap(), Version::first());
}

#[tokio::test]
#[serial]
async fn concurrent_writers_produce_one_winner() {
    let store = PostgresEventStore::new(get_test_pool().await);
    let aggregate_id = AggregateId::new();
    let stream = stream_for(aggregate_id);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let stream = stream.clone();
            tokio::spawn(async move {
                store
                    .append_to_stream(
                        &stream,
                        vec![create_test_event(aggregate_id, 0, "product.created")],
                        AppendOptions::expect_new(),
                    )
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(store.stream_version(&stream).await.unwrap(), Version::first());
}

#[tokio::test]
#[serial]
async fn read_after_version_and_missing_stream() {
    let store = PostgresEventStore::new(get_test_pool().await);
    let aggregate_id = AggregateId::new();
    let stream = stream_for(aggregate_id);

    assert!(store.read_stream(&stream, None).await.unwrap().is_not_found());

    let events = (0..3)
        .map(|v| create_test_event(aggregate_id, v, "product.price-updated"))
        .collect();
    store
        .append_to_stream(&stream, events, AppendOptions::new())
        .await
        .unwrap();

    let tail = store
        .read_stream(&stream, Some(Version::new(1)))
        .await
        .unwrap()
        .into_events();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].revision, StreamRevision(2));

    let past_end = store
        .read_stream(&stream, Some(Version::new(2)))
        .await
        .unwrap();
    assert!(!past_end.is_not_found());
    assert!(past_end.into_events().is_empty());
}

#[tokio::test]
#[serial]
async fn snapshot_upsert_keeps_highest_version() {
    let store = PostgresSnapshotStore::new(get_test_pool().await);
    let aggregate_id = AggregateId::new();

    assert!(store.get(aggregate_id).await.unwrap().is_none());

    store
        .put(Snapshot::new(
            aggregate_id,
            "Product",
            Version::new(400),
            serde_json::json!({"state": "newer"}),
        ))
        .await
        .unwrap();
    store
        .put(Snapshot::new(
            aggregate_id,
            "Product",
            Version::new(200),
            serde_json::json!({"state": "older"}),
        ))
        .await
        .unwrap();

    let retrieved = store.get(aggregate_id).await.unwrap().unwrap();
    assert_eq!(retrieved.version, Version::new(400));
    assert_eq!(retrieved.state, serde_json::json!({"state": "newer"}));
}
