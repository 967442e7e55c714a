//! Drains pending outbox records into downstream queues.

use std::time::{Duration, Instant};

use futures_util::{StreamExt, stream};

use crate::{
    DownstreamQueue, OutboxError, OutboxId, OutboxRecord, OutboxStore, QueueJob, Result,
};

/// Tuning for [`OutboxPublisher`].
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Maximum records fetched per batch.
    pub batch_size: usize,
    /// Upper bound on a single enqueue and on each store call.
    pub publish_timeout: Duration,
    /// Records published concurrently within a batch.
    pub concurrency: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            publish_timeout: Duration::from_secs(5),
            concurrency: 8,
        }
    }
}

/// Outcome of one [`OutboxPublisher::publish_batch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub processed: usize,
    pub published: usize,
    pub failed: usize,
}

/// At-least-once publisher.
///
/// A record is only marked published after its queue accepted it, so a crash
/// in between redelivers it on the next batch. Consumers deduplicate on the
/// job's idempotency key.
pub struct OutboxPublisher<S, Q> {
    store: S,
    queue: Q,
    config: PublisherConfig,
}

impl<S, Q> OutboxPublisher<S, Q>
where
    S: OutboxStore,
    Q: DownstreamQueue,
{
    pub fn new(store: S, queue: Q, config: PublisherConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Publishes one batch of due records.
    ///
    /// Individual publish failures are recorded with `mark_failed` and counted
    /// in the result; only a failure to read or acknowledge the batch itself is
    /// returned as an error.
    #[tracing::instrument(skip(self))]
    pub async fn publish_batch(&self) -> Result<BatchResult> {
        let started = Instant::now();

        let records = self
            .bounded("next_batch", self.store.next_batch(self.config.batch_size))
            .await?;
        if records.is_empty() {
            return Ok(BatchResult::default());
        }

        let outcomes: Vec<(OutboxId, std::result::Result<(), String>)> = stream::iter(records)
            .map(|record| async move {
                let id = record.id;
                (id, self.publish_one(&record).await)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut result = BatchResult {
            processed: outcomes.len(),
            ..BatchResult::default()
        };
        let mut published_ids = Vec::new();

        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => published_ids.push(id),
                Err(error) => {
                    result.failed += 1;
                    tracing::warn!(%id, %error, "failed to publish outbox record");
                    if let Err(mark_error) = self
                        .bounded("mark_failed", self.store.mark_failed(id, &error))
                        .await
                    {
                        tracing::error!(%id, error = %mark_error, "failed to record publish failure");
                    }
                }
            }
        }

        if !published_ids.is_empty() {
            self.bounded("mark_published", self.store.mark_published(&published_ids))
                .await?;
            result.published = published_ids.len();
        }

        metrics::counter!("outbox_published_total").increment(result.published as u64);
        metrics::counter!("outbox_publish_failures_total").increment(result.failed as u64);
        metrics::histogram!("outbox_batch_duration_seconds").record(started.elapsed().as_secs_f64());

        tracing::debug!(
            processed = result.processed,
            published = result.published,
            failed = result.failed,
            "outbox batch complete"
        );
        Ok(result)
    }

    async fn publish_one(&self, record: &OutboxRecord) -> std::result::Result<(), String> {
        let job = QueueJob::from_record(record).map_err(|e| e.to_string())?;

        match tokio::time::timeout(self.config.publish_timeout, self.queue.enqueue(job)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(error.to_string()),
            Err(_) => Err(format!(
                "publish timed out after {}ms",
                self.config.publish_timeout.as_millis()
            )),
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.config.publish_timeout, future)
            .await
            .map_err(|_| OutboxError::Timeout { operation })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryOutboxStore, InMemoryQueue, OutboxStatus, QueueError, RetryPolicy};
    use async_trait::async_trait;
    use event_store::{AggregateId, EventEnvelope, Version};

    fn record(event_type: &str) -> OutboxRecord {
        let event = EventEnvelope::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type("Product")
            .event_type(event_type)
            .version(Version::first())
            .payload_raw(serde_json::json!({"sku": "SKU-001"}))
            .build();
        OutboxRecord::from_event(&event, chrono::Utc::now())
    }

    #[tokio::test]
    async fn publishes_and_routes_every_due_record() {
        let store = InMemoryOutboxStore::default();
        let queue = InMemoryQueue::new();
        store
            .add(vec![record("product.created"), record("order.shipped")])
            .await
            .unwrap();

        let publisher = OutboxPublisher::new(store.clone(), queue.clone(), PublisherConfig::default());
        let result = publisher.publish_batch().await.unwrap();

        assert_eq!(
            result,
            BatchResult {
                processed: 2,
                published: 2,
                failed: 0
            }
        );
        assert_eq!(queue.jobs("projections").await.len(), 1);
        assert_eq!(queue.jobs("domain-events").await.len(), 1);
        assert_eq!(store.count_by_status().await.unwrap().published, 2);
        assert_eq!(publisher.publish_batch().await.unwrap(), BatchResult::default());
    }

    #[tokio::test]
    async fn one_bad_record_does_not_block_the_batch() {
        let store = InMemoryOutboxStore::default();
        let queue = InMemoryQueue::new();
        queue.fail_job_type("product.deactivated").await;

        let bad = record("product.deactivated");
        let bad_id = bad.id;
        store
            .add(vec![record("product.created"), bad, record("product.price-updated")])
            .await
            .unwrap();

        let publisher = OutboxPublisher::new(store.clone(), queue.clone(), PublisherConfig::default());
        let result = publisher.publish_batch().await.unwrap();

        assert_eq!(result.processed, 3);
        assert_eq!(result.published, 2);
        assert_eq!(result.failed, 1);

        let failed = store.get(bad_id).await.unwrap().unwrap();
        assert_eq!(failed.status, OutboxStatus::Pending);
        assert_eq!(failed.attempts, 1);
        assert!(failed.last_error.unwrap().contains("blocked"));
    }

    struct StalledQueue;

    #[async_trait]
    impl DownstreamQueue for StalledQueue {
        async fn enqueue(&self, _job: QueueJob) -> std::result::Result<(), QueueError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_queue_counts_as_failure() {
        let store = InMemoryOutboxStore::new(RetryPolicy::default());
        let stuck = record("product.created");
        let id = stuck.id;
        store.add(vec![stuck]).await.unwrap();

        let config = PublisherConfig {
            publish_timeout: Duration::from_millis(50),
            ..PublisherConfig::default()
        };
        let publisher = OutboxPublisher::new(store.clone(), StalledQueue, config);
        let result = publisher.publish_batch().await.unwrap();

        assert_eq!(result.failed, 1);
        let record = store.get(id).await.unwrap().unwrap();
        assert!(record.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn redelivery_after_lost_acknowledgement_is_deduplicated() {
        let store = InMemoryOutboxStore::default();
        let queue = InMemoryQueue::new();
        let pending = record("product.created");
        store.add(vec![pending.clone()]).await.unwrap();

        // A previous run enqueued the job but crashed before mark_published.
        queue
            .enqueue(QueueJob::from_record(&pending).unwrap())
            .await
            .unwrap();

        let publisher = OutboxPublisher::new(store.clone(), queue.clone(), PublisherConfig::default());
        let result = publisher.publish_batch().await.unwrap();

        assert_eq!(result.published, 1);
        assert_eq!(queue.jobs("projections").await.len(), 1);
    }

    #[tokio::test]
    async fn unreadable_store_fails_the_batch() {
        let store = InMemoryOutboxStore::default();
        store.set_unavailable(true);
        let publisher = OutboxPublisher::new(store, InMemoryQueue::new(), PublisherConfig::default());

        assert!(matches!(
            publisher.publish_batch().await,
            Err(OutboxError::Unavailable(_))
        ));
    }
}
