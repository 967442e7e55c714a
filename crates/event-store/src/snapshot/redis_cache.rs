use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;

use super::{Snapshot, SnapshotCache};
use crate::{AggregateId, EventStoreError, Result};

/// Writes the snapshot only if it is not older than the cached one, then refreshes the TTL.
const SNAPSHOT_SET_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'version')
if current and tonumber(current) > tonumber(ARGV[2]) then
    return 0
end
redis.call('HSET', KEYS[1], 'version', ARGV[2], 'data', ARGV[1])
redis.call('EXPIRE', KEYS[1], ARGV[3])
return 1
"#;

/// Snapshot cache tier backed by Redis.
#[derive(Clone)]
pub struct RedisSnapshotCache {
    pool: Pool,
    key_prefix: String,
    ttl: Duration,
}

impl RedisSnapshotCache {
    pub fn new(pool: Pool, ttl: Duration) -> Self {
        Self {
            pool,
            key_prefix: "snapshot".to_string(),
            ttl,
        }
    }

    /// Builds a connection pool for `redis_url`. No connection is opened until first use.
    pub fn from_url(redis_url: &str, ttl: Duration) -> Result<Self> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| EventStoreError::Cache(format!("failed to create Redis pool: {e}")))?;
        Ok(Self::new(pool, ttl))
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn key(&self, aggregate_id: AggregateId) -> String {
        format!("{}:{}", self.key_prefix, aggregate_id)
    }

    fn ttl_seconds(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| EventStoreError::Cache(format!("failed to get Redis connection: {e}")))
    }
}

fn cache_error(error: redis::RedisError) -> EventStoreError {
    EventStoreError::Cache(error.to_string())
}

#[async_trait]
impl SnapshotCache for RedisSnapshotCache {
    async fn get(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        let mut connection = self.connection().await?;
        let data: Option<String> = connection
            .hget(self.key(aggregate_id), "data")
            .await
            .map_err(cache_error)?;

        match data {
            Some(json) => match serde_json::from_str(&json) {
                Ok(snapshot) => Ok(Some(snapshot)),
                Err(error) => {
                    tracing::warn!(%aggregate_id, %error, "discarding undecodable cached snapshot");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn put(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        let mut connection = self.connection().await?;

        let written: i32 = redis::Script::new(SNAPSHOT_SET_SCRIPT)
            .key(self.key(snapshot.aggregate_id))
            .arg(json)
            .arg(snapshot.version.as_i64())
            .arg(self.ttl_seconds())
            .invoke_async(&mut *connection)
            .await
            .map_err(cache_error)?;

        if written == 0 {
            tracing::debug!(
                aggregate_id = %snapshot.aggregate_id,
                version = %snapshot.version,
                "newer snapshot already cached"
            );
        }
        Ok(())
    }

    async fn invalidate(&self, aggregate_id: AggregateId) -> Result<()> {
        let mut connection = self.connection().await?;
        let _: i32 = connection
            .del(self.key(aggregate_id))
            .await
            .map_err(cache_error)?;
        Ok(())
    }
}
