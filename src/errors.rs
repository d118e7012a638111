//! Error types shared across the supervisor.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Probe timeouts and malformed mailbox lines are deliberately absent: the
/// former degrade to `Liveness::Unknown`, the latter are dropped at parse
/// time.
#[derive(Debug)]
pub enum AppError {
    /// A session with the requested name is already registered.
    AlreadyExists(String),
    /// Requested session does not exist.
    NotFound(String),
    /// The worker process could not be started. Retryable.
    SpawnFailed(String),
    /// The primary session cannot be torn down.
    Protected(String),
    /// Workspace has uncommitted changes; retry with `force`.
    DirtyWorkspace(String),
    /// Requested status change is not allowed by the lifecycle state machine.
    InvalidTransition(String),
    /// Session name violates naming rules.
    InvalidName(String),
    /// Both terminal transport modes failed for a viewer connection.
    StreamDropped(String),
    /// Workspace provisioner failure other than a dirty tree.
    Workspace(String),
    /// Process host failure (input, resize, snapshot, attach).
    Host(String),
    /// Notification sink delivery failure.
    Sink(String),
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::SpawnFailed(msg) => write!(f, "spawn failed: {msg}"),
            Self::Protected(msg) => write!(f, "protected: {msg}"),
            Self::DirtyWorkspace(msg) => write!(f, "dirty workspace: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            Self::InvalidName(msg) => write!(f, "invalid name: {msg}"),
            Self::StreamDropped(msg) => write!(f, "stream dropped: {msg}"),
            Self::Workspace(msg) => write!(f, "workspace: {msg}"),
            Self::Host(msg) => write!(f, "host: {msg}"),
            Self::Sink(msg) => write!(f, "sink: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Whether the caller may reasonably retry the same operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SpawnFailed(_) | Self::Io(_) | Self::Host(_))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
