//! Normalized update events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use scorelink_transport_traits::HubInvocation;

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    /// A score was created
    Created,
    /// A score was changed
    Updated,
    /// A score was removed
    Deleted,
}

impl UpdateKind {
    /// Maps a hub event name to its kind; `None` for names this client does not handle
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "ScoreCreated" => Some(Self::Created),
            "ScoreUpdated" => Some(Self::Updated),
            "ScoreDeleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// The hub event name for this kind
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::Created => "ScoreCreated",
            Self::Updated => "ScoreUpdated",
            Self::Deleted => "ScoreDeleted",
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// A score update pushed by the hub.
///
/// `entity` is the hub's record as-is; the manager does not interpret it.
/// Events are delivered at most once per received message and never replayed,
/// so a consumer may see the same logical change twice after a reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    /// Created, updated or deleted
    pub kind: UpdateKind,
    /// The affected record
    pub entity: Value,
    /// Local receive time
    pub received_at: DateTime<Utc>,
}

impl UpdateEvent {
    /// Create an event received now
    pub fn new(kind: UpdateKind, entity: Value) -> Self {
        Self {
            kind,
            entity,
            received_at: Utc::now(),
        }
    }

    /// Normalizes a hub push; `None` for event names this client does not handle
    pub fn from_invocation(invocation: HubInvocation) -> Option<Self> {
        let kind = UpdateKind::from_event_name(&invocation.target)?;
        let entity = invocation.arguments.into_iter().next().unwrap_or(Value::Null);
        Some(Self::new(kind, entity))
    }

    /// The hub event name this update arrived as
    pub fn event_name(&self) -> &'static str {
        self.kind.event_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_from_invocation() {
        let event = UpdateEvent::from_invocation(
            HubInvocation::new("ScoreUpdated").with_argument(json!({"id": 9, "entityId": "s-1"})),
        )
        .unwrap();
        assert_eq!(event.kind, UpdateKind::Updated);
        assert_eq!(event.entity, json!({"id": 9, "entityId": "s-1"}));
        assert_eq!(event.event_name(), "ScoreUpdated");
    }

    #[test]
    fn test_missing_payload_is_null() {
        let event = UpdateEvent::from_invocation(HubInvocation::new("ScoreDeleted")).unwrap();
        assert_eq!(event.kind, UpdateKind::Deleted);
        assert_eq!(event.entity, Value::Null);
    }

    #[test]
    fn test_unknown_event_name() {
        assert!(UpdateEvent::from_invocation(HubInvocation::new("SessionClosed")).is_none());
        assert_eq!(UpdateKind::from_event_name("scoreupdated"), None);
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in [UpdateKind::Created, UpdateKind::Updated, UpdateKind::Deleted] {
            assert_eq!(UpdateKind::from_event_name(kind.event_name()), Some(kind));
        }
        assert_eq!(UpdateKind::Created.to_string(), "created");
    }
}
