use async_trait::async_trait;

use crate::{EventEnvelope, Result, StreamId, StreamRevision, Version};

/// Options for appending events to a stream.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Expected version of the stream for optimistic concurrency control.
    /// If None, no version check is performed (use with caution).
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the stream to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Creates options expecting the stream to not exist (new aggregate).
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// Outcome of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    /// Raw revision of the last event written; the expected version for the next append.
    pub next_expected_revision: StreamRevision,
}

/// An event as read back from the log, with the log's own position for it.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    /// Position of the event in its stream.
    pub revision: StreamRevision,
    /// The stored envelope.
    pub envelope: EventEnvelope,
}

/// Result of reading a stream.
///
/// A stream that was never written to is distinct from one that has no
/// events after the requested position.
#[derive(Debug, Clone)]
pub enum ReadStreamOutcome {
    NotFound,
    Events(Vec<RecordedEvent>),
}

impl ReadStreamOutcome {
    /// Returns the events, treating a missing stream as empty.
    pub fn into_events(self) -> Vec<RecordedEvent> {
        match self {
            ReadStreamOutcome::NotFound => Vec::new(),
            ReadStreamOutcome::Events(events) => events,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReadStreamOutcome::NotFound)
    }
}

/// Core trait for event log implementations.
///
/// An event log persists ordered, append-only streams of events.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends events to a stream.
    ///
    /// Events are appended atomically - either all succeed or none do.
    /// If `options.expected_version` is set, the operation will fail with
    /// `ConcurrencyConflict` if the current stream version doesn't match.
    /// The log assigns the final versions.
    async fn append_to_stream(
        &self,
        stream_id: &StreamId,
        events: Vec<EventEnvelope>,
        options: AppendOptions,
    ) -> Result<AppendResult>;

    /// Reads a stream in version order (oldest first).
    ///
    /// With `from_version_exclusive` set, only events with a strictly greater
    /// version are returned.
    async fn read_stream(
        &self,
        stream_id: &StreamId,
        from_version_exclusive: Option<Version>,
    ) -> Result<ReadStreamOutcome>;

    /// Gets the revision of the last event in a stream.
    ///
    /// Returns None if the stream doesn't exist.
    async fn stream_revision(&self, stream_id: &StreamId) -> Result<Option<StreamRevision>>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event to a stream.
    async fn append_event(
        &self,
        stream_id: &StreamId,
        event: EventEnvelope,
        options: AppendOptions,
    ) -> Result<AppendResult> {
        self.append_to_stream(stream_id, vec![event], options).await
    }

    /// Checks if a stream exists (has any events).
    async fn stream_exists(&self, stream_id: &StreamId) -> Result<bool> {
        Ok(self.stream_revision(stream_id).await?.is_some())
    }

    /// Gets the current version of a stream, `Version::initial()` if it doesn't exist.
    async fn stream_version(&self, stream_id: &StreamId) -> Result<Version> {
        match self.stream_revision(stream_id).await? {
            Some(revision) => Ok(Version::try_from(revision)?),
            None => Ok(Version::initial()),
        }
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Validates events before appending.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> std::result::Result<(), String> {
    let Some(first) = events.first() else {
        return Err("Cannot append empty event list".to_string());
    };

    for event in events.iter().skip(1) {
        if event.aggregate_id != first.aggregate_id {
            return Err("All events must be for the same aggregate".to_string());
        }
        if event.aggregate_type != first.aggregate_type {
            return Err("All events must have the same aggregate type".to_string());
        }
    }

    let mut expected_version = first.version;
    for event in events.iter().skip(1) {
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(format!(
                "Event versions must be sequential. Expected {}, got {}",
                expected_version, event.version
            ));
        }
    }

    Ok(())
}
