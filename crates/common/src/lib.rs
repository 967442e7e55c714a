//! Shared types for the event-sourced persistence core.

pub mod clock;
pub mod context;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use context::CommandContext;
pub use types::{AggregateId, TenantId};
