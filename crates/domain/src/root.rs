//! Aggregate root: identity, versioning and uncommitted events around an [`Aggregate`] state.

use chrono::{DateTime, Utc};
use common::{AggregateId, CommandContext, TenantId};
use event_store::{EventEnvelope, Snapshot, StreamId, Version};

use crate::{Aggregate, DomainError, DomainEvent};

/// An event applied in memory but not yet appended to the log.
#[derive(Debug, Clone)]
pub struct PendingEvent<E> {
    pub event: E,
    /// Version the aggregate reached by applying this event.
    pub version: Version,
    pub occurred_at: DateTime<Utc>,
    pub context: CommandContext,
}

/// Version and time of the last snapshot known to this root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMarker {
    pub version: Version,
    pub taken_at: DateTime<Utc>,
}

/// An aggregate instance with its identity, version and pending changes.
///
/// `version` is the number of applied events minus one, so a fresh root sits
/// at [`Version::initial`]. Nothing here touches storage; the repository does.
#[derive(Debug, Clone)]
pub struct AggregateRoot<A: Aggregate> {
    id: AggregateId,
    version: Version,
    state: A,
    uncommitted: Vec<PendingEvent<A::Event>>,
    last_snapshot: Option<SnapshotMarker>,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Creates an empty root with no history.
    pub fn new(id: AggregateId) -> Self {
        Self {
            id,
            version: Version::initial(),
            state: A::default(),
            uncommitted: Vec::new(),
            last_snapshot: None,
        }
    }

    /// Restores a root from snapshot state and replays the events recorded after it.
    pub fn load_from_snapshot(
        id: AggregateId,
        state: A,
        snapshot_version: Version,
        taken_at: DateTime<Utc>,
        subsequent: impl IntoIterator<Item = A::Event>,
    ) -> Self {
        let mut root = Self {
            id,
            version: snapshot_version,
            state,
            uncommitted: Vec::new(),
            last_snapshot: Some(SnapshotMarker {
                version: snapshot_version,
                taken_at,
            }),
        };
        root.replay(subsequent);
        root
    }

    pub fn id(&self) -> AggregateId {
        self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    pub fn uncommitted_events(&self) -> &[PendingEvent<A::Event>] {
        &self.uncommitted
    }

    pub fn has_uncommitted_events(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    pub fn last_snapshot(&self) -> Option<SnapshotMarker> {
        self.last_snapshot
    }

    /// Version of the stream as last read or written, ignoring pending events.
    pub fn persisted_version(&self) -> Version {
        Version::new(self.version.as_i64() - self.uncommitted.len() as i64)
    }

    /// Events applied since the last snapshot, or since the start without one.
    pub fn events_since_snapshot(&self) -> u64 {
        let base = self
            .last_snapshot
            .map(|marker| marker.version)
            .unwrap_or_else(Version::initial);
        self.version.events_since(base)
    }

    /// Applies a new event and records it as uncommitted, stamped with the
    /// context's issue time.
    pub fn apply(&mut self, event: A::Event, ctx: &CommandContext) {
        self.state.apply(&event);
        self.version = self.version.next();
        self.uncommitted.push(PendingEvent {
            event,
            version: self.version,
            occurred_at: ctx.issued_at,
            context: ctx.clone(),
        });
    }

    /// Applies historical events without recording them as uncommitted.
    pub fn replay(&mut self, events: impl IntoIterator<Item = A::Event>) {
        for event in events {
            self.state.apply(&event);
            self.version = self.version.next();
        }
    }

    pub fn mark_events_as_committed(&mut self) {
        self.uncommitted.clear();
    }

    /// Copies the current state into a snapshot. Does not write it anywhere.
    pub fn create_snapshot(&self, taken_at: DateTime<Utc>) -> Result<Snapshot, DomainError> {
        Ok(Snapshot::from_state(
            self.id,
            A::aggregate_type(),
            self.version,
            taken_at,
            &self.state,
        )?)
    }

    pub(crate) fn record_snapshot(&mut self, snapshot: &Snapshot) {
        self.last_snapshot = Some(SnapshotMarker {
            version: snapshot.version,
            taken_at: snapshot.taken_at,
        });
    }

    /// Runs `check` against the current state and, if it passes, `op`.
    ///
    /// A failing check returns its error without running `op`. If `op` fails,
    /// anything it applied is rolled back so the root is left as it was.
    pub fn execute_business_logic<T>(
        &mut self,
        check: impl FnOnce(&A) -> Result<(), DomainError>,
        op: impl FnOnce(&mut Self) -> Result<T, DomainError>,
    ) -> Result<T, DomainError> {
        check(&self.state)?;

        let saved_state = self.state.clone();
        let saved_version = self.version;
        let saved_pending = self.uncommitted.len();

        match op(self) {
            Ok(value) => Ok(value),
            Err(error) => {
                self.state = saved_state;
                self.version = saved_version;
                self.uncommitted.truncate(saved_pending);
                if !error.is_business_error() {
                    tracing::warn!(
                        aggregate_id = %self.id,
                        aggregate_type = A::aggregate_type(),
                        %error,
                        "business operation failed unexpectedly"
                    );
                }
                Err(error)
            }
        }
    }

    /// Stream holding this aggregate's events for `tenant`.
    pub fn stream_id(&self, tenant: &TenantId) -> StreamId {
        Self::stream_id_for(self.id, tenant)
    }

    pub(crate) fn stream_id_for(id: AggregateId, tenant: &TenantId) -> StreamId {
        StreamId::new(
            A::bounded_context(),
            A::aggregate_type(),
            A::schema_version(),
            tenant.clone(),
            id,
        )
    }

    /// Builds log envelopes for the uncommitted events.
    pub fn to_envelopes(&self) -> Result<Vec<EventEnvelope>, DomainError> {
        self.uncommitted
            .iter()
            .map(|pending| {
                Ok(EventEnvelope::builder()
                    .event_type(pending.event.event_type())
                    .aggregate_id(self.id)
                    .aggregate_type(A::aggregate_type())
                    .version(pending.version)
                    .occurred_at(pending.occurred_at)
                    .context(&pending.context)
                    .payload(&pending.event)?
                    .build())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::{Counter, CounterEvent};

    fn history() -> Vec<CounterEvent> {
        vec![
            CounterEvent::Incremented { by: 5 },
            CounterEvent::Incremented { by: -2 },
            CounterEvent::Reset,
            CounterEvent::Incremented { by: 4 },
            CounterEvent::Incremented { by: 1 },
        ]
    }

    #[test]
    fn new_root_has_no_history() {
        let root = AggregateRoot::<Counter>::new(AggregateId::new());
        assert_eq!(root.version(), Version::initial());
        assert_eq!(root.persisted_version(), Version::initial());
        assert!(!root.has_uncommitted_events());
    }

    #[test]
    fn apply_tracks_uncommitted_and_version() {
        let ctx = CommandContext::new("acme");
        let mut root = AggregateRoot::<Counter>::new(AggregateId::new());

        root.apply(CounterEvent::Incremented { by: 1 }, &ctx);
        root.apply(CounterEvent::Incremented { by: 2 }, &ctx);

        assert_eq!(root.version(), Version::new(1));
        assert_eq!(root.persisted_version(), Version::initial());
        assert_eq!(root.uncommitted_events().len(), 2);
        assert_eq!(root.uncommitted_events()[1].version, Version::new(1));
        assert_eq!(root.state().value, 3);

        root.mark_events_as_committed();
        assert_eq!(root.persisted_version(), Version::new(1));
    }

    #[test]
    fn replay_does_not_record_uncommitted() {
        let mut root = AggregateRoot::<Counter>::new(AggregateId::new());
        root.replay(history());

        assert_eq!(root.version(), Version::new(4));
        assert!(root.uncommitted_events().is_empty());
        assert_eq!(root.events_since_snapshot(), 5);
    }

    #[test]
    fn snapshot_plus_tail_matches_full_replay_at_every_cut() {
        let id = AggregateId::new();
        let events = history();

        let mut full = AggregateRoot::<Counter>::new(id);
        full.replay(events.clone());

        for cut in 0..events.len() {
            let mut prefix = AggregateRoot::<Counter>::new(id);
            prefix.replay(events[..=cut].iter().cloned());
            let snapshot = prefix.create_snapshot(Utc::now()).unwrap();

            let restored = AggregateRoot::<Counter>::load_from_snapshot(
                id,
                snapshot.state_as().unwrap(),
                snapshot.version,
                snapshot.taken_at,
                events[cut + 1..].iter().cloned(),
            );

            assert_eq!(restored.state(), full.state(), "cut at {cut}");
            assert_eq!(restored.version(), full.version(), "cut at {cut}");
            assert_eq!(restored.events_since_snapshot(), (events.len() - cut - 1) as u64);
        }
    }

    #[test]
    fn failed_check_skips_operation() {
        let ctx = CommandContext::new("acme");
        let mut root = AggregateRoot::<Counter>::new(AggregateId::new());
        let mut ran = false;

        let result = root.execute_business_logic(
            |_| Err(DomainError::validation("nope")),
            |r| {
                ran = true;
                r.apply(CounterEvent::Reset, &ctx);
                Ok(())
            },
        );

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert!(!ran);
        assert_eq!(root.version(), Version::initial());
    }

    #[test]
    fn failed_operation_rolls_back_applied_events() {
        let ctx = CommandContext::new("acme");
        let mut root = AggregateRoot::<Counter>::new(AggregateId::new());
        root.apply(CounterEvent::Incremented { by: 10 }, &ctx);

        let result: Result<(), _> = root.execute_business_logic(
            |_| Ok(()),
            |r| {
                r.apply(CounterEvent::Reset, &ctx);
                Err(DomainError::Unexpected("downstream exploded".to_string()))
            },
        );

        assert!(matches!(result, Err(DomainError::Unexpected(_))));
        assert_eq!(root.version(), Version::first());
        assert_eq!(root.state().value, 10);
        assert_eq!(root.uncommitted_events().len(), 1);
    }

    #[test]
    fn envelopes_carry_context_and_versions() {
        let ctx = CommandContext::new("acme")
            .with_correlation_id("corr-1")
            .with_user("u-1", "alice");
        let mut root = AggregateRoot::<Counter>::new(AggregateId::new());
        root.apply(CounterEvent::Incremented { by: 1 }, &ctx);
        root.apply(CounterEvent::Reset, &ctx);

        let envelopes = root.to_envelopes().unwrap();

        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].event_type, "counter.incremented");
        assert_eq!(envelopes[1].version, Version::new(1));
        assert_eq!(envelopes[0].aggregate_type, "Counter");
        assert_eq!(envelopes[0].tenant_id.as_str(), "acme");
        assert_eq!(envelopes[0].metadata.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(envelopes[1].username.as_deref(), Some("alice"));
    }

    #[test]
    fn stream_id_uses_aggregate_naming() {
        let id = AggregateId::new();
        let root = AggregateRoot::<Counter>::new(id);
        let stream = root.stream_id(&TenantId::new("acme"));

        assert_eq!(stream.to_string(), format!("testing.counter.v1-acme-{id}"));
    }
}
