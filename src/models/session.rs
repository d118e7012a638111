//! Session model and lifecycle helpers.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declared lifecycle status for a worker-bound session.
///
/// The status is what the worker (or operator) claims; whether the backing
/// process is running is observed separately and never stored here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Worker process is being started.
    Spawning,
    /// Worker is doing work.
    Active,
    /// Worker finished its current task and waits for more.
    Ready,
    /// Worker waits on an external dependency.
    Blocked,
    /// Worker asked a question or reported a problem.
    NeedsAttention,
    /// Work for this session is complete.
    Done,
    /// No backing process; awaiting respawn or teardown.
    Exited,
}

impl SessionStatus {
    /// States a running worker may move between freely.
    #[must_use]
    pub fn is_working(self) -> bool {
        matches!(
            self,
            Self::Active | Self::Ready | Self::Blocked | Self::NeedsAttention | Self::Done
        )
    }

    /// Wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spawning => "spawning",
            Self::Active => "active",
            Self::Ready => "ready",
            Self::Blocked => "blocked",
            Self::NeedsAttention => "needs_attention",
            Self::Done => "done",
            Self::Exited => "exited",
        }
    }

    /// Determine whether moving from `self` to `next` is permitted.
    ///
    /// `Spawning` is entered only through spawn/respawn, never via this check.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (_, Self::Exited) => true,
            (Self::Spawning, Self::Active) => true,
            (from, to) => from.is_working() && to.is_working(),
        }
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which advisory notifications have already fired for the current episode.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotifiedFlags {
    /// An `idle` event was emitted for the current unchanged-output run.
    pub idle: bool,
    /// A `stuck` event was emitted for the current unchanged-output run.
    pub stuck: bool,
}

/// A named binding between a worker process, a workspace and a declared status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique session name.
    pub name: String,
    /// Isolated workspace the worker runs in.
    pub workspace_path: PathBuf,
    /// Current declared status.
    pub declared_status: SessionStatus,
    /// When `declared_status` last changed.
    pub last_status_change_time: DateTime<Utc>,
    /// Hash of the most recently observed output tail.
    pub last_activity_signature: Option<String>,
    /// Advisory notifications already emitted.
    pub notified_flags: NotifiedFlags,
}

impl Session {
    /// Construct a session in the `Spawning` state.
    #[must_use]
    pub fn new(name: String, workspace_path: PathBuf) -> Self {
        Self {
            name,
            workspace_path,
            declared_status: SessionStatus::Spawning,
            last_status_change_time: Utc::now(),
            last_activity_signature: None,
            notified_flags: NotifiedFlags::default(),
        }
    }
}

/// Outcome of a status update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    /// Status before the request.
    pub old: SessionStatus,
    /// Status after the request.
    pub new: SessionStatus,
}

impl StatusChange {
    /// Whether the request actually moved the session.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.old != self.new
    }
}

/// Validate a session name.
///
/// Names must be non-empty and free of whitespace and `/`. A leading `@` is
/// reserved for the primary session and only accepted when `allow_reserved`
/// is set.
#[must_use]
pub fn is_valid_name(name: &str, allow_reserved: bool) -> bool {
    if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c == '/') {
        return false;
    }
    allow_reserved || !name.starts_with('@')
}
