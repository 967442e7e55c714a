//! Outbox: durable staging of committed events and at-least-once delivery downstream.
//!
//! - [`OutboxStore`] persists [`OutboxRecord`]s (in-memory and PostgreSQL)
//! - [`OutboxRouter`] picks a downstream queue from an event type
//! - [`OutboxPublisher`] drains one batch into a [`DownstreamQueue`]
//! - [`OutboxRelay`] polls the publisher until shut down

pub mod backoff;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod publisher;
pub mod queue;
pub mod record;
pub mod relay;
pub mod routing;
pub mod store;

pub use backoff::RetryPolicy;
pub use error::{OutboxError, Result};
pub use memory::InMemoryOutboxStore;
pub use postgres::PostgresOutboxStore;
pub use publisher::{BatchResult, OutboxPublisher, PublisherConfig};
pub use queue::{DownstreamQueue, InMemoryQueue, QueueError, QueueJob};
pub use record::{OutboxId, OutboxRecord, OutboxStatus};
pub use relay::{OutboxRelay, RelayConfig};
pub use routing::{OutboxRouter, QueueRoute};
pub use store::{OutboxStore, StatusCounts};
