//! Maps event types to downstream queues.

use serde::{Deserialize, Serialize};

/// A downstream queue an outbox record can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueRoute {
    Notifications,
    Projections,
    Default,
}

impl QueueRoute {
    /// Name of the queue this route delivers to.
    pub fn queue_name(&self) -> &'static str {
        match self {
            QueueRoute::Notifications => "notifications",
            QueueRoute::Projections => "projections",
            QueueRoute::Default => "domain-events",
        }
    }
}

impl std::fmt::Display for QueueRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.queue_name())
    }
}

const NOTIFICATION_MARKERS: &[&str] = &["notification", "notify", "email", "alert"];
const PROJECTION_MARKERS: &[&str] = &["created", "updated", "deactivated", "deleted", "changed"];

/// Classifies event types. Notification-like types win over projection-like ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutboxRouter;

impl OutboxRouter {
    pub fn route(event_type: &str) -> QueueRoute {
        let event_type = event_type.to_ascii_lowercase();
        let mentions = |markers: &[&str]| markers.iter().any(|m| event_type.contains(m));

        if mentions(NOTIFICATION_MARKERS) {
            QueueRoute::Notifications
        } else if mentions(PROJECTION_MARKERS) {
            QueueRoute::Projections
        } else {
            QueueRoute::Default
        }
    }
}
