//! Notification events emitted by the mailbox, registry and reconciler.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::SessionStatus;

/// Classification of a notification event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Declared status changed (or a worker message was received).
    StatusChange,
    /// Declared status disagreed with observed liveness and was corrected.
    Contradiction,
    /// Output has not changed across the idle window.
    Idle,
    /// Session has been `active` with unchanged output past the stuck threshold.
    Stuck,
}

impl EventKind {
    /// Advisory events are informational and never imply a failure.
    #[must_use]
    pub fn is_advisory(self) -> bool {
        matches!(self, Self::Idle | Self::Stuck)
    }

    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StatusChange => "status_change",
            Self::Contradiction => "contradiction",
            Self::Idle => "idle",
            Self::Stuck => "stuck",
        }
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable notification record fanned out to sinks.
///
/// Serializes to the flat wire shape
/// `{session, kind, old_status, new_status, reason, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationEvent {
    /// Session the event concerns.
    #[serde(rename = "session")]
    pub session_name: String,
    /// Event classification.
    pub kind: EventKind,
    /// Declared status before the event.
    pub old_status: SessionStatus,
    /// Declared status after the event.
    pub new_status: SessionStatus,
    /// Human-readable explanation.
    pub reason: String,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    /// Construct an event stamped with the current time.
    #[must_use]
    pub fn new(
        session_name: impl Into<String>,
        kind: EventKind,
        old_status: SessionStatus,
        new_status: SessionStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            session_name: session_name.into(),
            kind,
            old_status,
            new_status,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Whether this event must be surfaced as a hard notice.
    ///
    /// Contradictions and lifecycle failures (any transition into `exited`)
    /// always are; advisory events never are.
    #[must_use]
    pub fn is_hard_failure(&self) -> bool {
        match self.kind {
            EventKind::Contradiction => true,
            EventKind::StatusChange => {
                self.new_status == SessionStatus::Exited && self.old_status != SessionStatus::Exited
            }
            EventKind::Idle | EventKind::Stuck => false,
        }
    }
}
