use async_trait::async_trait;
use common::TenantId;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventEnvelope, EventId, EventMetadata, EventStoreError, Result, StreamId,
    StreamRevision, Version,
    store::{
        AppendOptions, AppendResult, EventStore, ReadStreamOutcome, RecordedEvent,
        validate_events_for_append,
    },
};

const UNIQUE_STREAM_VERSION: &str = "unique_stream_version";

/// PostgreSQL-backed event log.
///
/// Each stream is serialized through a transaction-scoped advisory lock, and
/// the `(stream_id, version)` unique constraint backs up the version check.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<RecordedEvent> {
        let metadata: EventMetadata = serde_json::from_value(row.try_get("metadata")?)?;
        let version = Version::checked(row.try_get("version")?)?;

        let envelope = EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version,
            occurred_at: row.try_get("occurred_at")?,
            tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id")?),
            user_id: row.try_get("user_id")?,
            username: row.try_get("username")?,
            payload: row.try_get("payload")?,
            metadata,
        };

        Ok(RecordedEvent {
            revision: StreamRevision::try_from(version)?,
            envelope,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, events, options), fields(stream = %stream_id, count = events.len()))]
    async fn append_to_stream(
        &self,
        stream_id: &StreamId,
        mut events: Vec<EventEnvelope>,
        options: AppendOptions,
    ) -> Result<AppendResult> {
        validate_events_for_append(&events).map_err(EventStoreError::InvalidAppend)?;

        let stream_key = stream_id.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&stream_key)
            .execute(&mut *tx)
            .await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE stream_id = $1")
                .bind(&stream_key)
                .fetch_one(&mut *tx)
                .await?;
        let current_version = Version::checked(current.unwrap_or(-1))?;

        if let Some(expected) = options.expected_version
            && expected != current_version
        {
            return Err(EventStoreError::conflict(stream_id, expected, current_version));
        }

        let mut version = current_version;
        for event in &mut events {
            version = version.next();
            event.version = Version::checked(version.as_i64())?;

            sqlx::query(
                r#"
                INSERT INTO events (id, stream_id, version, event_type, aggregate_id, aggregate_type,
                                    tenant_id, user_id, username, occurred_at, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(&stream_key)
            .bind(event.version.as_i64())
            .bind(&event.event_type)
            .bind(event.aggregate_id.as_uuid())
            .bind(&event.aggregate_type)
            .bind(event.tenant_id.as_str())
            .bind(&event.user_id)
            .bind(&event.username)
            .bind(event.occurred_at)
            .bind(&event.payload)
            .bind(serde_json::to_value(&event.metadata)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some(UNIQUE_STREAM_VERSION)
                {
                    return EventStoreError::conflict(
                        stream_id,
                        options.expected_version.unwrap_or(current_version),
                        event.version,
                    );
                }
                EventStoreError::Database(e)
            })?;
        }

        tx.commit().await?;

        tracing::debug!(last_version = %version, "appended events");
        Ok(AppendResult {
            next_expected_revision: StreamRevision::try_from(version)?,
        })
    }

    async fn read_stream(
        &self,
        stream_id: &StreamId,
        from_version_exclusive: Option<Version>,
    ) -> Result<ReadStreamOutcome> {
        let stream_key = stream_id.to_string();
        let after = from_version_exclusive.unwrap_or_else(Version::initial);

        let rows = sqlx::query(
            r#"
            SELECT id, version, event_type, aggregate_id, aggregate_type, tenant_id,
                   user_id, username, occurred_at, payload, metadata
            FROM events
            WHERE stream_id = $1 AND version > $2
            ORDER BY version ASC
            "#,
        )
        .bind(&stream_key)
        .bind(after.as_i64())
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM events WHERE stream_id = $1)")
                    .bind(&stream_key)
                    .fetch_one(&self.pool)
                    .await?;
            if !exists {
                return Ok(ReadStreamOutcome::NotFound);
            }
        }

        let events = rows
            .into_iter()
            .map(Self::row_to_event)
            .collect::<Result<Vec<_>>>()?;
        Ok(ReadStreamOutcome::Events(events))
    }

    async fn stream_revision(&self, stream_id: &StreamId) -> Result<Option<StreamRevision>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE stream_id = $1")
                .bind(stream_id.to_string())
                .fetch_one(&self.pool)
                .await?;

        match version {
            Some(v) => Ok(Some(StreamRevision::try_from(Version::checked(v)?)?)),
            None => Ok(None),
        }
    }
}
