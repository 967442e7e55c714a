use std::str::FromStr;

use chrono::{DateTime, Utc};
use event_store::{AggregateId, EventEnvelope, EventId, EventMetadata};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{OutboxError, RetryPolicy};

/// Unique identifier of an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxId(Uuid);

impl OutboxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OutboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OutboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery status of an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "published" => Ok(OutboxStatus::Published),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(OutboxError::InvalidStatus(other.to_string())),
        }
    }
}

/// A committed event waiting to be handed to a downstream queue.
///
/// `attempts` only ever grows. Once `published`, a record never changes again
/// and is eventually removed by retention cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: OutboxId,
    pub event_id: EventId,
    pub event_type: String,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub payload: serde_json::Value,
    pub metadata: EventMetadata,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Stages a committed event. Tenant and user are carried in the metadata.
    pub fn from_event(event: &EventEnvelope, now: DateTime<Utc>) -> Self {
        let mut metadata = event.metadata.clone();
        metadata.extra.insert(
            "tenant_id".to_string(),
            serde_json::Value::String(event.tenant_id.to_string()),
        );
        if let Some(user_id) = &event.user_id {
            metadata
                .extra
                .insert("user_id".to_string(), serde_json::Value::String(user_id.clone()));
        }

        Self {
            id: OutboxId::new(),
            event_id: event.event_id,
            event_type: event.event_type.clone(),
            aggregate_id: event.aggregate_id,
            aggregate_type: event.aggregate_type.clone(),
            payload: event.payload.clone(),
            metadata,
            status: OutboxStatus::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
            last_error: None,
            next_retry_at: None,
            published_at: None,
        }
    }

    /// Pending and not waiting out a backoff delay.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Pending && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// Moves the record to `published`. Returns false if it already was.
    pub fn record_published(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == OutboxStatus::Published {
            return false;
        }
        self.status = OutboxStatus::Published;
        self.published_at = Some(now);
        self.next_retry_at = None;
        self.updated_at = now;
        true
    }

    /// Counts a failed publish and schedules the next attempt.
    pub fn record_failure(&mut self, error: &str, policy: &RetryPolicy, now: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.to_string());
        self.next_retry_at = Some(now + backoff_delay(policy, self.attempts));
        self.status = if policy.is_exhausted(self.attempts) {
            OutboxStatus::Failed
        } else {
            OutboxStatus::Pending
        };
        self.updated_at = now;
    }

    /// A parked failure that may be picked up again under `max_attempts`.
    pub fn is_retryable(&self, max_attempts: u32, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Failed
            && self.attempts < max_attempts
            && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// Puts a failed record back in the pending queue.
    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Pending;
        self.updated_at = now;
    }
}

pub(crate) fn backoff_delay(policy: &RetryPolicy, attempts: u32) -> chrono::Duration {
    chrono::Duration::from_std(policy.delay_for_attempt(attempts))
        .unwrap_or_else(|_| chrono::Duration::weeks(52))
}
