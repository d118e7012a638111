//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Worker process launch settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Agent CLI binary started inside each session (e.g. `claude`).
    #[serde(default = "default_worker_command")]
    pub command: String,
    /// Arguments passed to the worker command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the worker.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: default_worker_command(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

fn default_worker_command() -> String {
    "claude".into()
}

/// Isolated workspace provisioning settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkspacesConfig {
    /// Directory (relative to the root workspace) holding per-session worktrees.
    #[serde(default = "default_worktrees_dir")]
    pub worktrees_dir: PathBuf,
    /// Ref new workspaces branch from.
    #[serde(default = "default_base_ref")]
    pub base_ref: String,
}

impl Default for WorkspacesConfig {
    fn default() -> Self {
        Self {
            worktrees_dir: default_worktrees_dir(),
            base_ref: default_base_ref(),
        }
    }
}

fn default_worktrees_dir() -> PathBuf {
    PathBuf::from(".orc/.worktrees")
}

fn default_base_ref() -> String {
    "HEAD".into()
}

/// Reconciliation loop thresholds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ReconcileConfig {
    /// Seconds between reconciliation passes.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Liveness / snapshot probe timeout in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Number of trailing output lines hashed into the activity signature.
    #[serde(default = "default_idle_tail_lines")]
    pub idle_tail_lines: usize,
    /// Consecutive samples with an unchanged signature before `idle` fires.
    #[serde(default = "default_idle_samples")]
    pub idle_samples: u32,
    /// Seconds of unchanged output in `active` before `stuck` fires.
    #[serde(default = "default_stuck_threshold_seconds")]
    pub stuck_threshold_seconds: u64,
    /// Consecutive samples an advisory condition must hold before emitting.
    #[serde(default = "default_debounce_samples")]
    pub debounce_samples: u32,
    /// Consecutive dead samples before a contradiction is resolved.
    #[serde(default = "default_contradiction_samples")]
    pub contradiction_samples: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            probe_timeout_ms: default_probe_timeout_ms(),
            idle_tail_lines: default_idle_tail_lines(),
            idle_samples: default_idle_samples(),
            stuck_threshold_seconds: default_stuck_threshold_seconds(),
            debounce_samples: default_debounce_samples(),
            contradiction_samples: default_contradiction_samples(),
        }
    }
}

impl ReconcileConfig {
    /// Interval between passes.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Probe timeout.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Stuck threshold.
    #[must_use]
    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_threshold_seconds)
    }
}

fn default_interval_seconds() -> u64 {
    5
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

fn default_idle_tail_lines() -> usize {
    40
}

fn default_idle_samples() -> u32 {
    6
}

fn default_stuck_threshold_seconds() -> u64 {
    900
}

fn default_debounce_samples() -> u32 {
    2
}

fn default_contradiction_samples() -> u32 {
    1
}

/// Mailbox watcher settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MailboxConfig {
    /// Fallback rescan interval in case a change notification is missed.
    #[serde(default = "default_rescan_interval_ms")]
    pub rescan_interval_ms: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            rescan_interval_ms: default_rescan_interval_ms(),
        }
    }
}

impl MailboxConfig {
    /// Fallback rescan interval.
    #[must_use]
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }
}

fn default_rescan_interval_ms() -> u64 {
    5000
}

/// Terminal bridge settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// HTTP / WebSocket port for remote viewers.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Grace period before falling back to polling, in milliseconds.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    /// Snapshot polling cadence, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Client-side input batching window in polling mode, in milliseconds.
    #[serde(default = "default_input_debounce_ms")]
    pub input_debounce_ms: u64,
    /// Initial terminal rows for new worker PTYs.
    #[serde(default = "default_rows")]
    pub rows: u16,
    /// Initial terminal columns for new worker PTYs.
    #[serde(default = "default_cols")]
    pub cols: u16,
    /// Consecutive failed snapshot fetches before the viewer gives up.
    #[serde(default = "default_max_poll_failures")]
    pub max_poll_failures: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            grace_ms: default_grace_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            input_debounce_ms: default_input_debounce_ms(),
            rows: default_rows(),
            cols: default_cols(),
            max_poll_failures: default_max_poll_failures(),
        }
    }
}

fn default_http_port() -> u16 {
    7778
}

fn default_grace_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    300
}

fn default_input_debounce_ms() -> u64 {
    16
}

fn default_rows() -> u16 {
    40
}

fn default_cols() -> u16 {
    120
}

fn default_max_poll_failures() -> u32 {
    5
}

/// Notification sink settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NotificationsConfig {
    /// Optional remote push endpoint receiving every event as JSON.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_primary_session() -> String {
    "@main".into()
}

fn default_mailbox_path() -> PathBuf {
    PathBuf::from(".orc/mailbox")
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Root workspace bound to the primary session.
    pub root_workspace: PathBuf,
    /// Name of the protected primary session.
    #[serde(default = "default_primary_session")]
    pub primary_session: String,
    /// Mailbox file location relative to each session's workspace.
    #[serde(default = "default_mailbox_path")]
    pub mailbox_path: PathBuf,
    /// Worker launch settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Workspace provisioning settings.
    #[serde(default)]
    pub workspaces: WorkspacesConfig,
    /// Reconciliation thresholds.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// Mailbox watcher settings.
    #[serde(default)]
    pub mailbox: MailboxConfig,
    /// Terminal bridge settings.
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Notification sinks.
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Absolute directory holding provisioned worktrees.
    #[must_use]
    pub fn worktrees_dir(&self) -> PathBuf {
        self.root_workspace.join(&self.workspaces.worktrees_dir)
    }

    fn validate(&mut self) -> Result<()> {
        if self.reconcile.interval_seconds == 0 {
            return Err(AppError::Config(
                "reconcile.interval_seconds must be greater than zero".into(),
            ));
        }

        if self.reconcile.idle_samples == 0 || self.reconcile.debounce_samples == 0 {
            return Err(AppError::Config(
                "reconcile sample counts must be greater than zero".into(),
            ));
        }

        if self.bridge.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "bridge.poll_interval_ms must be greater than zero".into(),
            ));
        }

        if self.worker.command.trim().is_empty() {
            return Err(AppError::Config("worker.command must not be empty".into()));
        }

        if self.mailbox_path.is_absolute() {
            return Err(AppError::Config(
                "mailbox_path must be relative to the session workspace".into(),
            ));
        }

        let canonical_root = self
            .root_workspace
            .canonicalize()
            .map_err(|err| AppError::Config(format!("root_workspace invalid: {err}")))?;
        self.root_workspace = canonical_root;

        Ok(())
    }
}
