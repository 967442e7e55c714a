use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{CommandContext, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AggregateId, Version};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<EventId> for Uuid {
    fn from(id: EventId) -> Self {
        id.0
    }
}

/// Traceability metadata carried by every event and outbox record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Correlation ID of the originating request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// ID of the message that caused this event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,

    /// Any other caller-supplied values, passed through untouched.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl EventMetadata {
    /// Copies the correlation and causation IDs out of a command context.
    pub fn from_context(ctx: &CommandContext) -> Self {
        Self {
            correlation_id: Some(ctx.correlation_id.clone()),
            causation_id: ctx.causation_id.clone(),
            extra: HashMap::new(),
        }
    }
}

/// An event envelope containing a domain event along with its metadata.
///
/// Envelopes are immutable once built; the event log stores them as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The type of the event (e.g., "product.created").
    pub event_type: String,

    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g., "Product").
    pub aggregate_type: String,

    /// The version of the aggregate after this event.
    pub version: Version,

    /// When the event happened.
    pub occurred_at: DateTime<Utc>,

    /// Tenant that owns the stream.
    pub tenant_id: TenantId,

    /// User who triggered the event, if known.
    pub user_id: Option<String>,

    /// Display name of the user, if known.
    pub username: Option<String>,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Correlation / causation metadata.
    pub metadata: EventMetadata,
}

impl EventEnvelope {
    /// Creates a new event envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    aggregate_id: Option<AggregateId>,
    aggregate_type: Option<String>,
    version: Option<Version>,
    occurred_at: Option<DateTime<Utc>>,
    tenant_id: TenantId,
    user_id: Option<String>,
    username: Option<String>,
    payload: Option<serde_json::Value>,
    metadata: EventMetadata,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the aggregate ID.
    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    /// Sets the aggregate type.
    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Sets the version.
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets the occurrence time. If not set, the current time will be used.
    pub fn occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    /// Copies tenant, user and correlation data from a command context.
    pub fn context(mut self, ctx: &CommandContext) -> Self {
        self.tenant_id = ctx.tenant_id.clone();
        self.user_id = ctx.user_id.clone();
        self.username = ctx.username.clone();
        self.metadata = EventMetadata::from_context(ctx);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds a pass-through metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.extra.insert(key.into(), value);
        self
    }

    /// Builds the event envelope.
    ///
    /// # Panics
    ///
    /// Panics if required fields (event_type, aggregate_id, aggregate_type, version, payload)
    /// are not set.
    pub fn build(self) -> EventEnvelope {
        EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type.expect("event_type is required"),
            aggregate_id: self.aggregate_id.expect("aggregate_id is required"),
            aggregate_type: self.aggregate_type.expect("aggregate_type is required"),
            version: self.version.expect("version is required"),
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
            tenant_id: self.tenant_id,
            user_id: self.user_id,
            username: self.username,
            payload: self.payload.expect("payload is required"),
            metadata: self.metadata,
        }
    }

    /// Tries to build the event envelope, returning None if required fields are missing.
    pub fn try_build(self) -> Option<EventEnvelope> {
        Some(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type?,
            aggregate_id: self.aggregate_id?,
            aggregate_type: self.aggregate_type?,
            version: self.version?,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
            tenant_id: self.tenant_id,
            user_id: self.user_id,
            username: self.username,
            payload: self.payload?,
            metadata: self.metadata,
        })
    }
}
