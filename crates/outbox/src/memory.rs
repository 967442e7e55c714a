use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use common::{Clock, SystemClock};
use tokio::sync::RwLock;

use crate::{
    OutboxError, OutboxId, OutboxRecord, OutboxStatus, Result, RetryPolicy,
    store::{OutboxStore, StatusCounts},
};

/// In-memory outbox for tests and local runs.
///
/// Records are kept in insertion order, which doubles as creation order.
#[derive(Clone)]
pub struct InMemoryOutboxStore {
    records: Arc<RwLock<Vec<OutboxRecord>>>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    unavailable: Arc<AtomicBool>,
    failing_adds: Arc<AtomicU32>,
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl InMemoryOutboxStore {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            records: Arc::default(),
            policy,
            clock: Arc::new(SystemClock),
            unavailable: Arc::default(),
            failing_adds: Arc::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Makes every operation fail while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` calls to `add` fail.
    pub fn fail_next_adds(&self, count: u32) {
        self.failing_adds.store(count, Ordering::SeqCst);
    }

    /// Every record currently stored, in creation order.
    pub async fn all(&self) -> Vec<OutboxRecord> {
        self.records.read().await.clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(OutboxError::Unavailable("outbox store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn add(&self, records: Vec<OutboxRecord>) -> Result<()> {
        self.check_available()?;
        let injected = self
            .failing_adds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(OutboxError::Unavailable("outbox insert failed".to_string()));
        }

        let mut stored = self.records.write().await;
        for record in records {
            if !stored.iter().any(|r| r.id == record.id) {
                stored.push(record);
            }
        }
        Ok(())
    }

    async fn next_batch(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        self.check_available()?;
        let now = self.clock.now();
        let records = self.records.read().await;

        let mut due: Vec<_> = records.iter().filter(|r| r.is_due(now)).cloned().collect();
        // Stable sort keeps insertion order for equal timestamps.
        due.sort_by_key(|r| r.created_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn mark_published(&self, ids: &[OutboxId]) -> Result<()> {
        self.check_available()?;
        let now = self.clock.now();
        let mut records = self.records.write().await;

        for record in records.iter_mut().filter(|r| ids.contains(&r.id)) {
            record.record_published(now);
        }
        Ok(())
    }

    async fn mark_failed(&self, id: OutboxId, error: &str) -> Result<()> {
        self.check_available()?;
        let now = self.clock.now();
        let mut records = self.records.write().await;

        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(OutboxError::RecordNotFound(id))?;
        if record.status == OutboxStatus::Published {
            return Ok(());
        }
        record.record_failure(error, &self.policy, now);
        Ok(())
    }

    async fn retry_failed(&self, max_attempts: u32) -> Result<Vec<OutboxRecord>> {
        self.check_available()?;
        let now = self.clock.now();
        let mut records = self.records.write().await;

        let mut requeued = Vec::new();
        for record in records
            .iter_mut()
            .filter(|r| r.is_retryable(max_attempts, now))
        {
            record.requeue(now);
            requeued.push(record.clone());
        }
        Ok(requeued)
    }

    async fn cleanup(&self, older_than_days: u32) -> Result<u64> {
        self.check_available()?;
        let cutoff = self.clock.now() - chrono::Duration::days(i64::from(older_than_days));
        let mut records = self.records.write().await;

        let before = records.len();
        records.retain(|r| {
            !(r.status == OutboxStatus::Published && r.published_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - records.len()) as u64)
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxRecord>> {
        self.check_available()?;
        Ok(self.records.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn count_by_status(&self) -> Result<StatusCounts> {
        self.check_available()?;
        let records = self.records.read().await;
        let mut counts = StatusCounts::default();
        for record in records.iter() {
            match record.status {
                OutboxStatus::Pending => counts.pending += 1,
                OutboxStatus::Published => counts.published += 1,
                OutboxStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
