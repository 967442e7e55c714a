use common::AggregateId;
use event_store::{EventStoreError, UnsafeNumericConversion, Version};
use outbox::OutboxError;
use thiserror::Error;

/// Boxed cause carried by [`DomainError::AggregateRebuildFailed`].
pub type RebuildCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by aggregates, the repository and the product service.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Command input was rejected before anything was applied.
    #[error("{0}")]
    Validation(String),

    /// The command is not allowed in the aggregate's current state.
    #[error("{0}")]
    InvariantViolation(String),

    /// No stream and no snapshot exist for the aggregate.
    #[error("{aggregate_type} {aggregate_id} not found")]
    NotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// Another writer appended to the stream first.
    #[error(
        "Concurrency conflict on stream {stream_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        stream_id: String,
        expected: Version,
        actual: Version,
    },

    /// The stream could not be read or decoded back into state.
    #[error("Failed to rebuild aggregate {aggregate_id}: {source}")]
    AggregateRebuildFailed {
        aggregate_id: AggregateId,
        #[source]
        source: RebuildCause,
    },

    #[error(transparent)]
    UnsafeNumericConversion(#[from] UnsafeNumericConversion),

    /// Events were appended but their outbox records could not be written.
    #[error("Outbox write failed for aggregate {aggregate_id} after {attempts} attempts: {source}")]
    OutboxWriteFailed {
        aggregate_id: AggregateId,
        attempts: u32,
        #[source]
        source: OutboxError,
    },

    #[error("Operation '{operation}' timed out")]
    Timeout { operation: &'static str },

    #[error("Event store error: {0}")]
    EventStore(EventStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    pub(crate) fn rebuild_failed(
        aggregate_id: AggregateId,
        source: impl Into<RebuildCause>,
    ) -> Self {
        Self::AggregateRebuildFailed {
            aggregate_id,
            source: source.into(),
        }
    }

    /// True for rule violations a caller can fix by changing the command.
    pub fn is_business_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvariantViolation(_))
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl From<EventStoreError> for DomainError {
    fn from(error: EventStoreError) -> Self {
        match error {
            EventStoreError::ConcurrencyConflict {
                stream_id,
                expected,
                actual,
            } => Self::ConcurrencyConflict {
                stream_id,
                expected,
                actual,
            },
            EventStoreError::UnsafeNumericConversion(e) => Self::UnsafeNumericConversion(e),
            other => Self::EventStore(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflict_maps_to_domain_conflict() {
        let error: DomainError = EventStoreError::ConcurrencyConflict {
            stream_id: "catalog.product.v1-acme-x".to_string(),
            expected: Version::first(),
            actual: Version::new(3),
        }
        .into();

        assert!(error.is_concurrency_conflict());
        assert!(!error.is_business_error());
    }

    #[test]
    fn business_errors_display_their_message() {
        let error = DomainError::invariant("Product is already inactive");
        assert!(error.is_business_error());
        assert_eq!(error.to_string(), "Product is already inactive");
    }
}
