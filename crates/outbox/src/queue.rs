//! Downstream queue contract and an in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{OutboxRecord, OutboxRouter};

/// A unit of work handed to a downstream queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueJob {
    pub queue: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    /// Consumers deduplicate on this; it is the event id.
    pub idempotency_key: String,
}

impl QueueJob {
    /// Builds the job for a record, routed by its event type.
    pub fn from_record(record: &OutboxRecord) -> Result<Self, serde_json::Error> {
        let payload = serde_json::json!({
            "event_id": record.event_id,
            "event_type": record.event_type,
            "aggregate_id": record.aggregate_id,
            "aggregate_type": record.aggregate_type,
            "payload": record.payload,
            "metadata": serde_json::to_value(&record.metadata)?,
        });

        Ok(Self {
            queue: OutboxRouter::route(&record.event_type).queue_name().to_string(),
            job_type: record.event_type.clone(),
            payload,
            idempotency_key: record.event_id.to_string(),
        })
    }
}

/// Errors reported by a downstream queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Queue '{0}' is unavailable")]
    Unavailable(String),

    #[error("Queue rejected job: {0}")]
    Rejected(String),
}

/// A queue that accepts jobs for asynchronous processing.
///
/// Job-level retries are the queue's concern.
#[async_trait]
pub trait DownstreamQueue: Send + Sync {
    async fn enqueue(&self, job: QueueJob) -> Result<(), QueueError>;
}

/// In-memory queue for tests and local runs.
///
/// A job whose idempotency key was already accepted on the same queue is
/// acknowledged without being stored again.
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    jobs: Arc<RwLock<HashMap<String, Vec<QueueJob>>>>,
    seen: Arc<RwLock<HashSet<(String, String)>>>,
    failing: Arc<AtomicBool>,
    failing_job_types: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every job while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Rejects jobs of one type until cleared.
    pub async fn fail_job_type(&self, job_type: impl Into<String>) {
        self.failing_job_types.write().await.insert(job_type.into());
    }

    pub async fn clear_failures(&self) {
        self.set_failing(false);
        self.failing_job_types.write().await.clear();
    }

    /// Jobs accepted on one queue, in arrival order.
    pub async fn jobs(&self, queue: &str) -> Vec<QueueJob> {
        self.jobs.read().await.get(queue).cloned().unwrap_or_default()
    }

    pub async fn total_jobs(&self) -> usize {
        self.jobs.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl DownstreamQueue for InMemoryQueue {
    async fn enqueue(&self, job: QueueJob) -> Result<(), QueueError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable(job.queue));
        }
        if self.failing_job_types.read().await.contains(&job.job_type) {
            return Err(QueueError::Rejected(format!(
                "job type '{}' is blocked",
                job.job_type
            )));
        }

        let key = (job.queue.clone(), job.idempotency_key.clone());
        if !self.seen.write().await.insert(key) {
            tracing::debug!(queue = %job.queue, key = %job.idempotency_key, "duplicate job ignored");
            return Ok(());
        }

        self.jobs
            .write()
            .await
            .entry(job.queue.clone())
            .or_default()
            .push(job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(queue: &str, key: &str) -> QueueJob {
        QueueJob {
            queue: queue.to_string(),
            job_type: "product.created".to_string(),
            payload: serde_json::json!({}),
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_keys_are_accepted_once() {
        let queue = InMemoryQueue::new();

        queue.enqueue(job("projections", "evt-1")).await.unwrap();
        queue.enqueue(job("projections", "evt-1")).await.unwrap();
        queue.enqueue(job("notifications", "evt-1")).await.unwrap();

        assert_eq!(queue.jobs("projections").await.len(), 1);
        assert_eq!(queue.total_jobs().await, 2);
    }

    #[tokio::test]
    async fn failure_injection() {
        let queue = InMemoryQueue::new();
        queue.set_failing(true);
        assert!(matches!(
            queue.enqueue(job("projections", "evt-1")).await,
            Err(QueueError::Unavailable(_))
        ));

        queue.clear_failures().await;
        queue.fail_job_type("product.created").await;
        assert!(matches!(
            queue.enqueue(job("projections", "evt-1")).await,
            Err(QueueError::Rejected(_))
        ));
        assert_eq!(queue.total_jobs().await, 0);
    }
}
