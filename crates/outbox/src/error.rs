//! Outbox error types.

use thiserror::Error;

use crate::{OutboxId, QueueError};

/// Errors that can occur while staging or publishing outbox records.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failed to serialize or deserialize a record.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No record exists with the given id.
    #[error("Outbox record not found: {0}")]
    RecordNotFound(OutboxId),

    /// A stored status string is not one we know.
    #[error("Unknown outbox status '{0}'")]
    InvalidStatus(String),

    /// The downstream queue rejected a job.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// An operation did not finish within its deadline.
    #[error("Outbox operation '{operation}' timed out")]
    Timeout { operation: &'static str },

    /// The backing store is unreachable.
    #[error("Outbox store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
