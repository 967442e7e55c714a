//! Background loop that keeps the outbox drained.

use std::time::Duration;

use tokio::sync::watch;

use crate::{BatchResult, DownstreamQueue, OutboxPublisher, OutboxStore, Result, RetryPolicy};

/// Scheduling for [`OutboxRelay`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Pause between batches when the previous batch was not full.
    pub poll_interval: Duration,
    /// How often parked failures are retried and old records purged.
    pub maintenance_interval: Duration,
    /// Limit passed to `retry_failed`. Must exceed the store's
    /// `RetryPolicy::max_attempts` or parked failures are never revived.
    pub retry_ceiling: u32,
    /// Published records older than this are deleted.
    pub retention_days: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            maintenance_interval: Duration::from_secs(60),
            retry_ceiling: RetryPolicy::default().retry_ceiling(),
            retention_days: 7,
        }
    }
}

/// Polls the publisher until told to stop.
pub struct OutboxRelay<S, Q> {
    publisher: OutboxPublisher<S, Q>,
    config: RelayConfig,
}

impl<S, Q> OutboxRelay<S, Q>
where
    S: OutboxStore,
    Q: DownstreamQueue,
{
    pub fn new(publisher: OutboxPublisher<S, Q>, config: RelayConfig) -> Self {
        Self { publisher, config }
    }

    /// Publishes one batch.
    pub async fn run_once(&self) -> Result<BatchResult> {
        self.publisher.publish_batch().await
    }

    /// Requeues retryable failures and purges expired published records.
    #[tracing::instrument(skip(self))]
    pub async fn run_maintenance(&self) -> Result<()> {
        let store = self.publisher.store();

        let requeued = store.retry_failed(self.config.retry_ceiling).await?;
        if !requeued.is_empty() {
            tracing::info!(count = requeued.len(), "requeued failed outbox records");
        }

        let removed = store.cleanup(self.config.retention_days).await?;
        if removed > 0 {
            tracing::info!(count = removed, "purged published outbox records");
        }
        Ok(())
    }

    /// Runs until `shutdown` flips to true or its sender is dropped.
    ///
    /// A full batch is followed immediately by the next one; otherwise the
    /// relay waits `poll_interval`. Errors are logged and the loop continues.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.publisher.config().batch_size,
            "outbox relay started"
        );

        let mut maintenance = tokio::time::interval(self.config.maintenance_interval);
        maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let batch_was_full = match self.run_once().await {
                Ok(result) => result.processed >= self.publisher.config().batch_size,
                Err(error) => {
                    tracing::error!(%error, "outbox batch failed");
                    false
                }
            };
            if batch_was_full {
                continue;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = maintenance.tick() => {
                    if let Err(error) = self.run_maintenance().await {
                        tracing::error!(%error, "outbox maintenance failed");
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::info!("outbox relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryOutboxStore, InMemoryQueue, OutboxRecord, OutboxStatus, PublisherConfig};
    use event_store::{AggregateId, EventEnvelope, Version};

    fn record() -> OutboxRecord {
        let event = EventEnvelope::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type("Product")
            .event_type("product.created")
            .version(Version::first())
            .payload_raw(serde_json::json!({}))
            .build();
        OutboxRecord::from_event(&event, chrono::Utc::now())
    }

    #[tokio::test(start_paused = true)]
    async fn relay_drains_and_stops_on_shutdown() {
        let store = InMemoryOutboxStore::default();
        let queue = InMemoryQueue::new();
        store.add(vec![record(), record(), record()]).await.unwrap();

        let publisher = OutboxPublisher::new(
            store.clone(),
            queue.clone(),
            PublisherConfig {
                batch_size: 2,
                ..PublisherConfig::default()
            },
        );
        let relay = std::sync::Arc::new(OutboxRelay::new(publisher, RelayConfig::default()));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let relay = relay.clone();
            async move { relay.run(rx).await }
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.total_jobs().await, 3);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn default_wiring_revives_parked_failure_and_publishes_it() {
        let clock = common::FixedClock::new(chrono::Utc::now());
        let policy = RetryPolicy::default();
        let store = InMemoryOutboxStore::new(policy).with_clock(std::sync::Arc::new(clock.clone()));
        let queue = InMemoryQueue::new();
        let parked = record();
        let id = parked.id;
        store.add(vec![parked]).await.unwrap();

        for _ in 0..policy.max_attempts {
            store.mark_failed(id, "queue offline").await.unwrap();
        }
        assert_eq!(store.get(id).await.unwrap().unwrap().status, OutboxStatus::Pending);

        store.mark_failed(id, "queue offline").await.unwrap();
        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Failed);
        assert_eq!(stored.attempts, policy.max_attempts + 1);

        let relay = OutboxRelay::new(
            OutboxPublisher::new(store.clone(), queue.clone(), PublisherConfig::default()),
            RelayConfig::default(),
        );
        clock.advance(chrono::Duration::days(1));
        relay.run_maintenance().await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().status, OutboxStatus::Pending);

        let result = relay.run_once().await.unwrap();
        assert_eq!(result.published, 1);
        assert_eq!(store.get(id).await.unwrap().unwrap().status, OutboxStatus::Published);
        assert_eq!(queue.total_jobs().await, 1);
    }

    #[tokio::test]
    async fn maintenance_purges_nothing_fresh() {
        let store = InMemoryOutboxStore::default();
        let fresh = record();
        let id = fresh.id;
        store.add(vec![fresh]).await.unwrap();
        store.mark_published(&[id]).await.unwrap();

        let relay = OutboxRelay::new(
            OutboxPublisher::new(store.clone(), InMemoryQueue::new(), PublisherConfig::default()),
            RelayConfig::default(),
        );
        relay.run_maintenance().await.unwrap();

        assert!(store.get(id).await.unwrap().is_some());
    }
}
