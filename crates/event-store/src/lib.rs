//! Event log, stream identifiers and snapshot storage.
//!
//! The [`EventStore`] trait is the seam between aggregates and the log; an
//! in-memory and a PostgreSQL implementation are provided. Snapshots live in a
//! separate two-tier store, see [`snapshot`].

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod snapshot;
pub mod store;
pub mod stream;
pub mod version;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, EventMetadata};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use snapshot::{
    CachedSnapshotStore, InMemorySnapshotCache, InMemorySnapshotStore, PostgresSnapshotStore,
    RedisSnapshotCache, Snapshot, SnapshotCache, SnapshotStore,
};
pub use store::{
    AppendOptions, AppendResult, EventStore, EventStoreExt, ReadStreamOutcome, RecordedEvent,
};
pub use stream::{InvalidStreamId, StreamId};
pub use version::{MAX_SAFE_INTEGER, StreamRevision, UnsafeNumericConversion, Version};
