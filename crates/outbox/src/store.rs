use async_trait::async_trait;

use crate::{OutboxId, OutboxRecord, Result};

/// Number of records per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub published: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.published + self.failed
    }
}

/// Durable staging area for events awaiting downstream delivery.
///
/// Record ids are unique, so concurrent writers never overwrite each other.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persists new pending records. Ids already stored are skipped, so a
    /// retried batch is written once.
    async fn add(&self, records: Vec<OutboxRecord>) -> Result<()>;

    /// Up to `limit` due pending records, oldest first.
    async fn next_batch(&self, limit: usize) -> Result<Vec<OutboxRecord>>;

    /// Marks records as published. Ids already published are left untouched.
    async fn mark_published(&self, ids: &[OutboxId]) -> Result<()>;

    /// Counts a failed publish, schedules a retry, and parks the record as
    /// failed once the retry policy is exhausted.
    async fn mark_failed(&self, id: OutboxId, error: &str) -> Result<()>;

    /// Moves failed records with `attempts < max_attempts` whose retry time has
    /// passed back to pending, returning them.
    async fn retry_failed(&self, max_attempts: u32) -> Result<Vec<OutboxRecord>>;

    /// Deletes published records published more than `older_than_days` ago.
    /// Pending and failed records are never deleted.
    async fn cleanup(&self, older_than_days: u32) -> Result<u64>;

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxRecord>>;

    async fn count_by_status(&self) -> Result<StatusCounts>;
}
