//! Loading and saving aggregates against the event log, snapshot store and outbox.

use std::sync::Arc;
use std::time::Duration;

use common::{AggregateId, Clock, CommandContext, SystemClock};
use event_store::{
    AppendOptions, EventEnvelope, EventStore, EventStoreError, ReadStreamOutcome, RecordedEvent,
    Snapshot, SnapshotStore, Version,
};
use outbox::{OutboxError, OutboxRecord, OutboxStore};

use crate::{Aggregate, AggregateRoot, DomainError};

/// When the repository writes a new snapshot after a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    /// Snapshot once this many events were applied since the last one.
    pub event_count_threshold: u64,
    /// Snapshot once the last one is at least this old.
    pub time_threshold: Duration,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            event_count_threshold: 200,
            time_threshold: Duration::from_secs(5 * 60),
        }
    }
}

impl SnapshotPolicy {
    /// `elapsed_since` is `None` when the aggregate has never been snapshotted,
    /// in which case only the event count applies.
    pub fn should_snapshot(&self, events_since: u64, elapsed_since: Option<Duration>) -> bool {
        events_since >= self.event_count_threshold
            || elapsed_since.is_some_and(|elapsed| elapsed >= self.time_threshold)
    }
}

/// Tuning for [`AggregateRepository`].
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub snapshot_policy: SnapshotPolicy,
    /// Upper bound on each event log, snapshot and outbox call.
    pub operation_timeout: Duration,
    /// Outbox inserts attempted per save before giving up.
    pub outbox_write_attempts: u32,
    pub outbox_retry_delay: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            snapshot_policy: SnapshotPolicy::default(),
            operation_timeout: Duration::from_secs(10),
            outbox_write_attempts: 3,
            outbox_retry_delay: Duration::from_millis(100),
        }
    }
}

/// Persists aggregates of any type.
///
/// Streams are the source of truth. Snapshots only shorten replay and outbox
/// records are written after the append, so a crash between the two leaves
/// committed events without outbox records (see [`DomainError::OutboxWriteFailed`]).
pub struct AggregateRepository<E, S, O> {
    event_store: E,
    snapshot_store: S,
    outbox_store: O,
    config: RepositoryConfig,
    clock: Arc<dyn Clock>,
}

impl<E, S, O> AggregateRepository<E, S, O>
where
    E: EventStore,
    S: SnapshotStore,
    O: OutboxStore,
{
    pub fn new(event_store: E, snapshot_store: S, outbox_store: O, config: RepositoryConfig) -> Self {
        Self {
            event_store,
            snapshot_store,
            outbox_store,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn event_store(&self) -> &E {
        &self.event_store
    }

    pub fn snapshot_store(&self) -> &S {
        &self.snapshot_store
    }

    pub fn outbox_store(&self) -> &O {
        &self.outbox_store
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Rebuilds an aggregate from its latest snapshot plus the events after it.
    ///
    /// A snapshot that cannot be read or decoded is skipped and the whole
    /// stream is replayed instead.
    #[tracing::instrument(skip(self, ctx), fields(aggregate_type = A::aggregate_type(), tenant = %ctx.tenant_id))]
    pub async fn load<A: Aggregate>(
        &self,
        id: AggregateId,
        ctx: &CommandContext,
    ) -> Result<AggregateRoot<A>, DomainError> {
        let stream_id = AggregateRoot::<A>::stream_id_for(id, &ctx.tenant_id);
        let snapshot = self.latest_snapshot::<A>(id).await;
        let from_version = snapshot.as_ref().map(|(_, s)| s.version);

        let outcome = match self
            .bounded("read_stream", self.event_store.read_stream(&stream_id, from_version))
            .await?
        {
            Ok(outcome) => outcome,
            Err(EventStoreError::UnsafeNumericConversion(e)) => return Err(e.into()),
            Err(error) => return Err(DomainError::rebuild_failed(id, error)),
        };

        let recorded = match outcome {
            ReadStreamOutcome::Events(events) => events,
            ReadStreamOutcome::NotFound => {
                if snapshot.is_some() {
                    tracing::warn!(%stream_id, "snapshot found for a stream that does not exist");
                }
                return Err(DomainError::NotFound {
                    aggregate_type: A::aggregate_type(),
                    aggregate_id: id,
                });
            }
        };

        let base = from_version.unwrap_or_else(Version::initial);
        let events = decode_events::<A>(id, base, recorded)?;
        let replayed = events.len();

        let root = match snapshot {
            Some((state, snapshot)) => AggregateRoot::load_from_snapshot(
                id,
                state,
                snapshot.version,
                snapshot.taken_at,
                events,
            ),
            None if events.is_empty() => {
                return Err(DomainError::NotFound {
                    aggregate_type: A::aggregate_type(),
                    aggregate_id: id,
                });
            }
            None => {
                let mut root = AggregateRoot::new(id);
                root.replay(events);
                root
            }
        };

        tracing::debug!(
            %stream_id,
            version = %root.version(),
            replayed,
            from_snapshot = from_version.is_some(),
            "aggregate loaded"
        );
        Ok(root)
    }

    /// Appends the root's uncommitted events, writes their outbox records and
    /// snapshots the aggregate when the policy says so.
    ///
    /// `expected_version` defaults to the root's persisted version; any other
    /// value is a conflict, since the root's state only covers events up to its
    /// persisted version. A conflict is returned as-is and leaves the root
    /// untouched. A save with nothing pending only evaluates the snapshot policy.
    #[tracing::instrument(
        skip(self, root, ctx),
        fields(aggregate_id = %root.id(), aggregate_type = A::aggregate_type(), pending = root.uncommitted_events().len())
    )]
    pub async fn save<A: Aggregate>(
        &self,
        root: &mut AggregateRoot<A>,
        expected_version: Option<Version>,
        ctx: &CommandContext,
    ) -> Result<(), DomainError> {
        if root.has_uncommitted_events() {
            let stream_id = root.stream_id(&ctx.tenant_id);
            let persisted = root.persisted_version();
            let expected = expected_version.unwrap_or(persisted);
            if expected != persisted {
                metrics::counter!("repository_concurrency_conflicts_total").increment(1);
                tracing::warn!(%stream_id, %expected, %persisted, "root is not at the expected version");
                return Err(DomainError::ConcurrencyConflict {
                    stream_id: stream_id.to_string(),
                    expected,
                    actual: persisted,
                });
            }
            let envelopes = root.to_envelopes()?;

            tracing::debug!(%stream_id, %expected, count = envelopes.len(), "appending events");
            let appended = self
                .bounded(
                    "append_to_stream",
                    self.event_store.append_to_stream(
                        &stream_id,
                        envelopes.clone(),
                        AppendOptions::expect_version(expected),
                    ),
                )
                .await?;

            let result = match appended {
                Ok(result) => result,
                Err(error) => {
                    let error = DomainError::from(error);
                    if error.is_concurrency_conflict() {
                        metrics::counter!("repository_concurrency_conflicts_total").increment(1);
                        tracing::warn!(%stream_id, %error, "append rejected");
                    }
                    return Err(error);
                }
            };
            let committed = Version::try_from(result.next_expected_revision)?;
            tracing::debug!(%stream_id, version = %committed, "events appended");

            if let Err(error) = self.write_outbox(root.id(), &envelopes).await {
                root.mark_events_as_committed();
                return Err(error);
            }

            // The log numbered the events differently from the root; a snapshot
            // taken now would claim a version its state does not cover.
            if committed != root.version() {
                tracing::error!(
                    %stream_id,
                    log_version = %committed,
                    root_version = %root.version(),
                    "log version diverged from root, skipping snapshot"
                );
                root.mark_events_as_committed();
                return Err(DomainError::Unexpected(format!(
                    "stream {stream_id} is at version {committed} but the saved root is at {}",
                    root.version()
                )));
            }
        }

        self.snapshot_if_due(root).await;
        root.mark_events_as_committed();
        metrics::counter!("repository_saves_total").increment(1);
        Ok(())
    }

    /// Loads, mutates and saves, reloading and reapplying on concurrency conflicts.
    ///
    /// Gives up after `max_attempts` conflicts. Any other error, including a
    /// business rule failure from `mutate`, is returned immediately.
    #[tracing::instrument(skip(self, ctx, mutate), fields(aggregate_type = A::aggregate_type()))]
    pub async fn with_optimistic_retry<A, T, F>(
        &self,
        id: AggregateId,
        ctx: &CommandContext,
        max_attempts: u32,
        mut mutate: F,
    ) -> Result<(AggregateRoot<A>, T), DomainError>
    where
        A: Aggregate,
        F: FnMut(&mut AggregateRoot<A>) -> Result<T, DomainError> + Send,
        T: Send,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut root = self.load::<A>(id, ctx).await?;
            let value = mutate(&mut root)?;

            match self.save(&mut root, None, ctx).await {
                Ok(()) => return Ok((root, value)),
                Err(error) if error.is_concurrency_conflict() && attempt < max_attempts => {
                    tracing::warn!(%id, attempt, max_attempts, "concurrency conflict, retrying");
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn latest_snapshot<A: Aggregate>(&self, id: AggregateId) -> Option<(A, Snapshot)> {
        let snapshot = match self.bounded("snapshot_get", self.snapshot_store.get(id)).await {
            Ok(Ok(Some(snapshot))) => snapshot,
            Ok(Ok(None)) => return None,
            Ok(Err(error)) => {
                tracing::warn!(aggregate_id = %id, %error, "snapshot read failed, replaying full stream");
                return None;
            }
            Err(error) => {
                tracing::warn!(aggregate_id = %id, %error, "snapshot read failed, replaying full stream");
                return None;
            }
        };

        if snapshot.aggregate_type != A::aggregate_type() {
            tracing::warn!(
                aggregate_id = %id,
                found = %snapshot.aggregate_type,
                "snapshot belongs to another aggregate type, ignoring"
            );
            return None;
        }

        match snapshot.state_as::<A>() {
            Ok(state) => Some((state, snapshot)),
            Err(error) => {
                tracing::warn!(aggregate_id = %id, %error, "snapshot state undecodable, replaying full stream");
                None
            }
        }
    }

    async fn write_outbox(
        &self,
        aggregate_id: AggregateId,
        envelopes: &[EventEnvelope],
    ) -> Result<(), DomainError> {
        let now = self.clock.now();
        let records: Vec<OutboxRecord> = envelopes
            .iter()
            .map(|event| OutboxRecord::from_event(event, now))
            .collect();
        let attempts = self.config.outbox_write_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match tokio::time::timeout(
                self.config.operation_timeout,
                self.outbox_store.add(records.clone()),
            )
            .await
            {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(error)) => error,
                Err(_) => OutboxError::Timeout { operation: "add" },
            };

            if attempt >= attempts {
                metrics::counter!("outbox_write_failures_total").increment(1);
                tracing::error!(
                    %aggregate_id,
                    attempts,
                    %error,
                    "events committed but outbox records were not written"
                );
                return Err(DomainError::OutboxWriteFailed {
                    aggregate_id,
                    attempts,
                    source: error,
                });
            }

            tracing::warn!(%aggregate_id, attempt, %error, "outbox write failed, retrying");
            tokio::time::sleep(self.config.outbox_retry_delay).await;
        }
    }

    async fn snapshot_if_due<A: Aggregate>(&self, root: &mut AggregateRoot<A>) {
        if root.version().is_initial() {
            return;
        }

        let now = self.clock.now();
        let elapsed = root
            .last_snapshot()
            .and_then(|marker| (now - marker.taken_at).to_std().ok());
        if !self
            .config
            .snapshot_policy
            .should_snapshot(root.events_since_snapshot(), elapsed)
        {
            return;
        }

        let snapshot = match root.create_snapshot(now) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::warn!(aggregate_id = %root.id(), %error, "could not serialize snapshot");
                return;
            }
        };

        match self
            .bounded("snapshot_put", self.snapshot_store.put(snapshot.clone()))
            .await
        {
            Ok(Ok(())) => {
                root.record_snapshot(&snapshot);
                metrics::counter!("snapshots_taken_total").increment(1);
                tracing::debug!(aggregate_id = %root.id(), version = %snapshot.version, "snapshot taken");
            }
            Ok(Err(error)) => {
                tracing::warn!(aggregate_id = %root.id(), %error, "snapshot write failed");
            }
            Err(error) => {
                tracing::warn!(aggregate_id = %root.id(), %error, "snapshot write failed");
            }
        }
    }

    async fn bounded<F: Future>(
        &self,
        operation: &'static str,
        future: F,
    ) -> Result<F::Output, DomainError> {
        tokio::time::timeout(self.config.operation_timeout, future)
            .await
            .map_err(|_| DomainError::Timeout { operation })
    }
}

/// Decodes recorded events, checking each revision is safe and contiguous.
fn decode_events<A: Aggregate>(
    id: AggregateId,
    base: Version,
    recorded: Vec<RecordedEvent>,
) -> Result<Vec<A::Event>, DomainError> {
    let mut expected = base;
    let mut events = Vec::with_capacity(recorded.len());

    for record in recorded {
        let version = Version::try_from(record.revision)?;
        expected = expected.next();
        if version != expected {
            return Err(DomainError::rebuild_failed(
                id,
                format!("expected event version {expected}, stream has {version}"),
            ));
        }

        let event = serde_json::from_value::<A::Event>(record.envelope.payload)
            .map_err(|error| DomainError::rebuild_failed(id, error))?;
        events.push(event);
    }
    Ok(events)
}
