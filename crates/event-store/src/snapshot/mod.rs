//! Snapshots and the two-tier snapshot store.
//!
//! Snapshots are derived data: losing any of them only costs a longer replay.

mod memory;
mod postgres;
mod redis_cache;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AggregateId, Result, Version};

pub use memory::{InMemorySnapshotCache, InMemorySnapshotStore};
pub use postgres::PostgresSnapshotStore;
pub use redis_cache::RedisSnapshotCache;

/// A snapshot of an aggregate's state at a specific version.
///
/// Snapshots are used to optimize aggregate reconstruction by providing
/// a starting point, avoiding the need to replay all events from the beginning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The aggregate this snapshot belongs to.
    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g., "Product").
    pub aggregate_type: String,

    /// The version of the aggregate at the time of the snapshot.
    pub version: Version,

    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,

    /// The serialized aggregate state.
    pub state: serde_json::Value,
}

impl Snapshot {
    /// Creates a new snapshot taken now.
    pub fn new(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        state: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            taken_at: Utc::now(),
            state,
        }
    }

    /// Creates a snapshot from a serializable state.
    pub fn from_state<T: Serialize>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        taken_at: DateTime<Utc>,
        state: &T,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            taken_at,
            state: serde_json::to_value(state)?,
        })
    }

    /// Deserializes the snapshot state into a concrete type.
    pub fn state_as<T: for<'de> Deserialize<'de>>(&self) -> std::result::Result<T, serde_json::Error> {
        T::deserialize(&self.state)
    }
}

/// Durable keyed storage for the latest snapshot of each aggregate.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Retrieves the latest snapshot for an aggregate, if any.
    async fn get(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>>;

    /// Stores a snapshot.
    ///
    /// A snapshot older than the one already stored must not replace it.
    async fn put(&self, snapshot: Snapshot) -> Result<()>;
}

/// Fast, lossy tier in front of a [`SnapshotStore`].
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    async fn get(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>>;

    async fn put(&self, snapshot: &Snapshot) -> Result<()>;

    async fn invalidate(&self, aggregate_id: AggregateId) -> Result<()>;
}

/// Read-through, write-through snapshot store.
///
/// Reads try the cache first and fall back to durable storage, populating the
/// cache on a durable hit. Writes go to durable storage first. Cache failures
/// are logged and never reach the caller.
#[derive(Clone)]
pub struct CachedSnapshotStore<S, C> {
    durable: S,
    cache: C,
}

impl<S, C> CachedSnapshotStore<S, C>
where
    S: SnapshotStore,
    C: SnapshotCache,
{
    pub fn new(durable: S, cache: C) -> Self {
        Self { durable, cache }
    }

    /// Returns the durable tier.
    pub fn durable(&self) -> &S {
        &self.durable
    }

    /// Returns the cache tier.
    pub fn cache(&self) -> &C {
        &self.cache
    }
}

#[async_trait]
impl<S, C> SnapshotStore for CachedSnapshotStore<S, C>
where
    S: SnapshotStore,
    C: SnapshotCache,
{
    #[tracing::instrument(skip(self))]
    async fn get(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        match self.cache.get(aggregate_id).await {
            Ok(Some(snapshot)) => {
                metrics::counter!("snapshot_cache_hits_total").increment(1);
                return Ok(Some(snapshot));
            }
            Ok(None) => {
                metrics::counter!("snapshot_cache_misses_total").increment(1);
            }
            Err(error) => {
                tracing::warn!(%aggregate_id, %error, "snapshot cache read failed, using durable store");
            }
        }

        let snapshot = self.durable.get(aggregate_id).await?;

        if let Some(ref snapshot) = snapshot
            && let Err(error) = self.cache.put(snapshot).await
        {
            tracing::warn!(%aggregate_id, %error, "failed to populate snapshot cache");
        }

        Ok(snapshot)
    }

    #[tracing::instrument(skip(self, snapshot), fields(aggregate_id = %snapshot.aggregate_id, version = %snapshot.version))]
    async fn put(&self, snapshot: Snapshot) -> Result<()> {
        self.durable.put(snapshot.clone()).await?;

        if let Err(error) = self.cache.put(&snapshot).await {
            tracing::warn!(%error, "failed to write snapshot to cache");
            // A stale cached copy would shadow the new durable one until it expires.
            if let Err(error) = self.cache.invalidate(snapshot.aggregate_id).await {
                tracing::warn!(%error, "failed to invalidate snapshot cache entry");
            }
        }

        Ok(())
    }
}
