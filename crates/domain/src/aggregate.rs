//! Core aggregate and domain event traits.

use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone + std::fmt::Debug {
    /// Returns the event type name stored on the envelope, e.g. `product.created`.
    fn event_type(&self) -> &'static str;
}

/// State of an event-sourced aggregate type.
///
/// Implementors only describe how events change state. Identity, versioning,
/// uncommitted events and snapshots are handled by
/// [`AggregateRoot`](crate::AggregateRoot).
///
/// `apply` must be pure and deterministic:
/// - Given the same state and event, it must always produce the same new state
/// - It must not have side effects
/// - It must not fail (events represent facts that have happened)
pub trait Aggregate:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + std::fmt::Debug
{
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Aggregate type name, e.g. `Product`.
    fn aggregate_type() -> &'static str;

    /// Bounded context the aggregate's streams live in.
    fn bounded_context() -> &'static str;

    /// Schema version embedded in stream ids.
    fn schema_version() -> u32 {
        1
    }

    /// Applies an event to the state.
    fn apply(&mut self, event: &Self::Event);
}
