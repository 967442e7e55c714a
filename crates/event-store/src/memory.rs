use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    EventEnvelope, EventStoreError, Result, StreamId, StreamRevision, Version,
    store::{
        AppendOptions, AppendResult, EventStore, ReadStreamOutcome, RecordedEvent,
        validate_events_for_append,
    },
};

/// In-memory event log for tests and local runs.
///
/// The version check and the append happen under one write lock, so concurrent
/// writers to the same stream produce exactly one winner.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<StreamId, Vec<EventEnvelope>>>>,
    fail_reads: Arc<AtomicBool>,
    fail_appends: Arc<AtomicBool>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored across all streams.
    pub async fn event_count(&self) -> usize {
        self.streams.read().await.values().map(Vec::len).sum()
    }

    /// Returns a copy of every event in one stream.
    pub async fn stream_events(&self, stream_id: &StreamId) -> Vec<EventEnvelope> {
        self.streams
            .read()
            .await
            .get(stream_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes subsequent reads fail, simulating an unreachable log.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent appends fail, simulating an unreachable log.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Clears all streams.
    pub async fn clear(&self) {
        self.streams.write().await.clear();
    }
}

fn revision_of(index: usize) -> StreamRevision {
    StreamRevision(index as u64)
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_to_stream(
        &self,
        stream_id: &StreamId,
        mut events: Vec<EventEnvelope>,
        options: AppendOptions,
    ) -> Result<AppendResult> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable(
                "event log rejected the append".to_string(),
            ));
        }
        validate_events_for_append(&events).map_err(EventStoreError::InvalidAppend)?;

        let mut streams = self.streams.write().await;
        let stream = streams.entry(stream_id.clone()).or_default();

        let current_version = Version::initial().advance_by(stream.len())?;

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            if stream.is_empty() {
                streams.remove(stream_id);
            }
            return Err(EventStoreError::conflict(stream_id, expected, current_version));
        }

        let mut version = current_version;
        for event in &mut events {
            version = version.next();
            event.version = version;
        }
        stream.extend(events);

        Ok(AppendResult {
            next_expected_revision: revision_of(stream.len() - 1),
        })
    }

    async fn read_stream(
        &self,
        stream_id: &StreamId,
        from_version_exclusive: Option<Version>,
    ) -> Result<ReadStreamOutcome> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable(
                "event log read failed".to_string(),
            ));
        }

        let streams = self.streams.read().await;
        let Some(stream) = streams.get(stream_id) else {
            return Ok(ReadStreamOutcome::NotFound);
        };

        let skip = from_version_exclusive
            .map(|v| usize::try_from(v.as_i64() + 1).unwrap_or(0))
            .unwrap_or(0);

        let events = stream
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(index, envelope)| RecordedEvent {
                revision: revision_of(index),
                envelope: envelope.clone(),
            })
            .collect();

        Ok(ReadStreamOutcome::Events(events))
    }

    async fn stream_revision(&self, stream_id: &StreamId) -> Result<Option<StreamRevision>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable(
                "event log read failed".to_string(),
            ));
        }

        let streams = self.streams.read().await;
        Ok(streams
            .get(stream_id)
            .filter(|stream| !stream.is_empty())
            .map(|stream| revision_of(stream.len() - 1)))
    }
}
