use thiserror::Error;

use crate::{StreamId, UnsafeNumericConversion, Version};

/// Errors that can occur when interacting with the event log or snapshot storage.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// A concurrency conflict occurred when appending events.
    /// The expected version did not match the actual version.
    #[error(
        "Concurrency conflict on stream {stream_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        stream_id: String,
        expected: Version,
        actual: Version,
    },

    /// The batch of events handed to `append_to_stream` is malformed.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// A stream position could not be represented safely.
    #[error(transparent)]
    UnsafeNumericConversion(#[from] UnsafeNumericConversion),

    /// A stored stream identifier could not be parsed.
    #[error("Invalid stream id: {0}")]
    InvalidStreamId(#[from] crate::stream::InvalidStreamId),

    /// The event log or snapshot store is temporarily unavailable.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The snapshot cache tier failed.
    #[error("Cache error: {0}")]
    Cache(String),
}

impl EventStoreError {
    /// Builds a conflict error for a stream.
    pub fn conflict(stream_id: &StreamId, expected: Version, actual: Version) -> Self {
        Self::ConcurrencyConflict {
            stream_id: stream_id.to_string(),
            expected,
            actual,
        }
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
