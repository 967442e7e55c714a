//! Redis list-backed downstream queue.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use outbox::{DownstreamQueue, QueueError, QueueJob};

/// Pushes the job unless its idempotency key was seen within the dedupe window.
const ENQUEUE_ONCE_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], '1', 'NX', 'EX', ARGV[2]) then
    redis.call('LPUSH', KEYS[2], ARGV[1])
    return 1
end
return 0
"#;

/// Jobs are JSON-encoded [`QueueJob`]s pushed onto `{prefix}:{queue}`.
#[derive(Clone)]
pub struct RedisQueue {
    pool: Pool,
    key_prefix: String,
    dedupe_window: Duration,
}

impl RedisQueue {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            key_prefix: "queue".to_string(),
            dedupe_window: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    /// Builds a connection pool for `redis_url`. No connection is opened until first use.
    pub fn from_url(redis_url: &str) -> Result<Self, deadpool_redis::CreatePoolError> {
        let pool = Config::from_url(redis_url).create_pool(Some(Runtime::Tokio1))?;
        Ok(Self::new(pool))
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_dedupe_window(mut self, window: Duration) -> Self {
        self.dedupe_window = window;
        self
    }

    fn list_key(&self, queue: &str) -> String {
        format!("{}:{}", self.key_prefix, queue)
    }

    fn seen_key(&self, queue: &str, idempotency_key: &str) -> String {
        format!("{}:{}:seen:{}", self.key_prefix, queue, idempotency_key)
    }
}

#[async_trait]
impl DownstreamQueue for RedisQueue {
    async fn enqueue(&self, job: QueueJob) -> Result<(), QueueError> {
        let body = serde_json::to_string(&job).map_err(|e| QueueError::Rejected(e.to_string()))?;
        let mut connection = self
            .pool
            .get()
            .await
            .map_err(|e| QueueError::Unavailable(format!("{}: {e}", job.queue)))?;

        let pushed: i32 = redis::Script::new(ENQUEUE_ONCE_SCRIPT)
            .key(self.seen_key(&job.queue, &job.idempotency_key))
            .key(self.list_key(&job.queue))
            .arg(body)
            .arg(self.dedupe_window.as_secs().max(1))
            .invoke_async(&mut *connection)
            .await
            .map_err(|e| QueueError::Unavailable(format!("{}: {e}", job.queue)))?;

        if pushed == 0 {
            metrics::counter!("relay_duplicate_jobs_total").increment(1);
            tracing::debug!(
                queue = %job.queue,
                idempotency_key = %job.idempotency_key,
                "job already enqueued"
            );
        }
        Ok(())
    }
}
