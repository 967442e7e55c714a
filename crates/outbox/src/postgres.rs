use std::sync::Arc;

use async_trait::async_trait;
use common::{Clock, SystemClock};
use event_store::{AggregateId, EventId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    OutboxError, OutboxId, OutboxRecord, OutboxStatus, Result, RetryPolicy,
    record::backoff_delay,
    store::{OutboxStore, StatusCounts},
};

const RECORD_COLUMNS: &str = "id, event_id, event_type, aggregate_id, aggregate_type, payload, \
     metadata, status, attempts, created_at, updated_at, last_error, next_retry_at, published_at";

/// PostgreSQL-backed outbox, stored in the `outbox` table.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool, policy: RetryPolicy) -> Self {
        Self {
            pool,
            policy,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_record(row: PgRow) -> Result<OutboxRecord> {
        let status: String = row.try_get("status")?;
        let attempts: i32 = row.try_get("attempts")?;

        Ok(OutboxRecord {
            id: OutboxId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            payload: row.try_get("payload")?,
            metadata: serde_json::from_value(row.try_get("metadata")?)?,
            status: status.parse()?,
            attempts: u32::try_from(attempts).unwrap_or(0),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_error: row.try_get("last_error")?,
            next_retry_at: row.try_get("next_retry_at")?,
            published_at: row.try_get("published_at")?,
        })
    }
}

fn ids_as_uuids(ids: &[OutboxId]) -> Vec<Uuid> {
    ids.iter().map(OutboxId::as_uuid).collect()
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    #[tracing::instrument(skip(self, records), fields(count = records.len()))]
    async fn add(&self, records: Vec<OutboxRecord>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for record in &records {
            sqlx::query(
                r#"
                INSERT INTO outbox (id, event_id, event_type, aggregate_id, aggregate_type, payload,
                                    metadata, status, attempts, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(record.id.as_uuid())
            .bind(record.event_id.as_uuid())
            .bind(&record.event_type)
            .bind(record.aggregate_id.as_uuid())
            .bind(&record.aggregate_type)
            .bind(&record.payload)
            .bind(serde_json::to_value(&record.metadata)?)
            .bind(record.status.as_str())
            .bind(i32::try_from(record.attempts).unwrap_or(i32::MAX))
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn next_batch(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM outbox \
             WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= $1) \
             ORDER BY created_at ASC, id ASC \
             LIMIT $2"
        ))
        .bind(self.clock.now())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn mark_published(&self, ids: &[OutboxId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let now = self.clock.now();

        sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'published', published_at = $2, updated_at = $2, next_retry_at = NULL
            WHERE id = ANY($1) AND status <> 'published'
            "#,
        )
        .bind(ids_as_uuids(ids))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, id: OutboxId, error: &str) -> Result<()> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM outbox WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(OutboxError::RecordNotFound(id))?;

        let mut record = Self::row_to_record(row)?;
        if record.status == OutboxStatus::Published {
            return Ok(());
        }
        record.record_failure(error, &self.policy, now);

        sqlx::query(
            r#"
            UPDATE outbox
            SET attempts = $2, last_error = $3, next_retry_at = $4, status = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(i32::try_from(record.attempts).unwrap_or(i32::MAX))
        .bind(&record.last_error)
        .bind(record.next_retry_at)
        .bind(record.status.as_str())
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            %id,
            attempts = record.attempts,
            status = %record.status,
            retry_in_ms = backoff_delay(&self.policy, record.attempts).num_milliseconds(),
            "recorded publish failure"
        );
        Ok(())
    }

    async fn retry_failed(&self, max_attempts: u32) -> Result<Vec<OutboxRecord>> {
        let now = self.clock.now();

        let rows = sqlx::query(&format!(
            "UPDATE outbox SET status = 'pending', updated_at = $1 \
             WHERE status = 'failed' AND attempts < $2 \
               AND (next_retry_at IS NULL OR next_retry_at <= $1) \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(now)
        .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn cleanup(&self, older_than_days: u32) -> Result<u64> {
        let cutoff = self.clock.now() - chrono::Duration::days(i64::from(older_than_days));

        let result = sqlx::query(
            "DELETE FROM outbox WHERE status = 'published' AND published_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxRecord>> {
        let row = sqlx::query(&format!("SELECT {RECORD_COLUMNS} FROM outbox WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn count_by_status(&self) -> Result<StatusCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM outbox GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count = u64::try_from(row.try_get::<i64, _>("count")?).unwrap_or(0);
            match status.parse::<OutboxStatus>()? {
                OutboxStatus::Pending => counts.pending = count,
                OutboxStatus::Published => counts.published = count,
                OutboxStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }
}
