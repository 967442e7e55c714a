//! Caller-supplied envelope metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::TenantId;

/// Metadata a command caller attaches to every event and outbox record.
///
/// The core never interprets these values; they are passed explicitly through
/// load, apply and save so that nothing depends on ambient state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandContext {
    /// Tenant that owns the affected stream.
    pub tenant_id: TenantId,

    /// Correlation ID shared by everything caused by one external request.
    pub correlation_id: String,

    /// ID of the message that directly caused this command.
    pub causation_id: Option<String>,

    /// Acting user, if known.
    pub user_id: Option<String>,

    /// Display name of the acting user, if known.
    pub username: Option<String>,

    /// When the command was issued; events it produces carry this time.
    pub issued_at: DateTime<Utc>,
}

impl CommandContext {
    /// Creates a context for a tenant with a fresh correlation ID.
    pub fn new(tenant_id: impl Into<TenantId>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            correlation_id: Uuid::new_v4().to_string(),
            causation_id: None,
            user_id: None,
            username: None,
            issued_at: Utc::now(),
        }
    }

    /// Context for internal work with no external caller.
    pub fn system() -> Self {
        Self::new(TenantId::default()).with_user("system", "system")
    }

    /// Sets the correlation ID.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Sets the causation ID.
    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    /// Sets the acting user.
    pub fn with_user(mut self, user_id: impl Into<String>, username: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.username = Some(username.into());
        self
    }

    /// Sets the issue time, usually from an injected [`Clock`](crate::Clock).
    pub fn with_issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = issued_at;
        self
    }
}

impl Default for CommandContext {
    fn default() -> Self {
        Self::new(TenantId::default())
    }
}
