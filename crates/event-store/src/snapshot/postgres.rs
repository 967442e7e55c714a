use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::{Snapshot, SnapshotStore};
use crate::{AggregateId, Result, Version};

/// Durable snapshot tier stored in the `snapshots` table.
#[derive(Clone)]
pub struct PostgresSnapshotStore {
    pool: PgPool,
}

impl PostgresSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_snapshot(row: PgRow) -> Result<Snapshot> {
        Ok(Snapshot {
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::checked(row.try_get("version")?)?,
            taken_at: row.try_get::<DateTime<Utc>, _>("taken_at")?,
            state: row.try_get("state")?,
        })
    }
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    async fn get(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT aggregate_id, aggregate_type, version, taken_at, state
            FROM snapshots
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_snapshot).transpose()
    }

    async fn put(&self, snapshot: Snapshot) -> Result<()> {
        // Concurrent writers may finish out of order; never move the stored version backwards.
        sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, aggregate_type, version, taken_at, state)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (aggregate_id) DO UPDATE SET
                aggregate_type = EXCLUDED.aggregate_type,
                version = EXCLUDED.version,
                taken_at = EXCLUDED.taken_at,
                state = EXCLUDED.state
            WHERE snapshots.version <= EXCLUDED.version
            "#,
        )
        .bind(snapshot.aggregate_id.as_uuid())
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.version.as_i64())
        .bind(snapshot.taken_at)
        .bind(&snapshot.state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
