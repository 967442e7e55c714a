use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{Snapshot, SnapshotCache, SnapshotStore};
use crate::{AggregateId, EventStoreError, Result};

/// In-memory durable snapshot store for testing.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<AggregateId, Snapshot>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an unreachable backing store.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of stored snapshots.
    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable(
                "snapshot store unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn get(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        self.check_available()?;
        Ok(self.snapshots.read().await.get(&aggregate_id).cloned())
    }

    async fn put(&self, snapshot: Snapshot) -> Result<()> {
        self.check_available()?;
        let mut snapshots = self.snapshots.write().await;
        match snapshots.get(&snapshot.aggregate_id) {
            Some(existing) if existing.version > snapshot.version => {
                tracing::debug!(
                    aggregate_id = %snapshot.aggregate_id,
                    stored = %existing.version,
                    offered = %snapshot.version,
                    "ignoring older snapshot"
                );
            }
            _ => {
                snapshots.insert(snapshot.aggregate_id, snapshot);
            }
        }
        Ok(())
    }
}

/// Process-local snapshot cache with a per-entry time to live.
#[derive(Clone)]
pub struct InMemorySnapshotCache {
    entries: Arc<RwLock<HashMap<AggregateId, (Snapshot, Instant)>>>,
    ttl: Duration,
    unavailable: Arc<AtomicBool>,
}

impl InMemorySnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::default(),
            ttl,
            unavailable: Arc::default(),
        }
    }

    /// Simulates a cache outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EventStoreError::Cache("cache unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemorySnapshotCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[async_trait]
impl SnapshotCache for InMemorySnapshotCache {
    async fn get(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        self.check_available()?;
        let entries = self.entries.read().await;
        Ok(entries
            .get(&aggregate_id)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(snapshot, _)| snapshot.clone()))
    }

    async fn put(&self, snapshot: &Snapshot) -> Result<()> {
        self.check_available()?;
        let mut entries = self.entries.write().await;
        let is_older = entries
            .get(&snapshot.aggregate_id)
            .is_some_and(|(existing, _)| existing.version > snapshot.version);
        if !is_older {
            entries.insert(
                snapshot.aggregate_id,
                (snapshot.clone(), Instant::now() + self.ttl),
            );
        }
        Ok(())
    }

    async fn invalidate(&self, aggregate_id: AggregateId) -> Result<()> {
        self.check_available()?;
        self.entries.write().await.remove(&aggregate_id);
        Ok(())
    }
}
