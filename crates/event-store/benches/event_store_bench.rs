use common::{AggregateId, TenantId};
use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    AppendOptions, EventEnvelope, EventStore, InMemoryEventStore, InMemorySnapshotCache,
    InMemorySnapshotStore, CachedSnapshotStore, Snapshot, SnapshotStore, StreamId, Version,
};

fn stream_for(aggregate_id: AggregateId) -> StreamId {
    StreamId::new("catalog", "Product", 1, TenantId::default(), aggregate_id)
}

fn make_event(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("Product")
        .event_type("product.price-updated")
        .version(Version::new(version))
        .payload_raw(serde_json::json!({
            "old_price": version * 100,
            "new_price": (version + 1) * 100
        }))
        .build()
}

fn bench_append_batch_10(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_batch_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let agg_id = AggregateId::new();
                let events: Vec<EventEnvelope> = (0..10).map(|v| make_event(agg_id, v)).collect();
                store
                    .append_to_stream(&stream_for(agg_id), events, AppendOptions::expect_new())
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_read_stream(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let agg_id = AggregateId::new();
    let stream = stream_for(agg_id);

    rt.block_on(async {
        let events: Vec<EventEnvelope> = (0..200).map(|v| make_event(agg_id, v)).collect();
        store
            .append_to_stream(&stream, events, AppendOptions::new())
            .await
            .unwrap();
    });

    c.bench_function("event_store/read_stream_200", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.read_stream(&stream, None).await.unwrap();
            });
        });
    });

    c.bench_function("event_store/read_stream_tail_after_150", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .read_stream(&stream, Some(Version::new(150)))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_cached_snapshot_get(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = CachedSnapshotStore::new(
        InMemorySnapshotStore::new(),
        InMemorySnapshotCache::default(),
    );
    let agg_id = AggregateId::new();

    rt.block_on(async {
        store
            .put(Snapshot::new(
                agg_id,
                "Product",
                Version::new(199),
                serde_json::json!({"name": "Widget", "price": 9999}),
            ))
            .await
            .unwrap();
    });

    c.bench_function("snapshot_store/cached_get", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.get(agg_id).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_append_batch_10,
    bench_read_stream,
    bench_cached_snapshot_get,
);
criterion_main!(benches);
