//! Human-visible notice sink.
//!
//! Writes one line per event. Hard failures (contradictions, sessions
//! dropping to `exited`) are prefixed `[!]`, advisory `idle` / `stuck`
//! events `[~]`, ordinary status changes `[*]`, so an operator can tell
//! them apart at a glance.

use std::io::Write;
use std::sync::Mutex;

use tracing::{info, warn};

use super::NotificationSink;
use crate::models::event::NotificationEvent;
use crate::{AppError, BoxFuture, Result};

/// Sink writing formatted notices to a byte stream (stderr by default).
pub struct NoticeSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Default for NoticeSink {
    fn default() -> Self {
        Self::stderr()
    }
}

impl NoticeSink {
    /// Notices go to standard error.
    #[must_use]
    pub fn stderr() -> Self {
        Self::with_writer(Box::new(std::io::stderr()))
    }

    /// Notices go to an arbitrary writer.
    #[must_use]
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

/// Render one event as a notice line (without trailing newline).
#[must_use]
pub fn format_notice(event: &NotificationEvent) -> String {
    let marker = if event.is_hard_failure() {
        "[!]"
    } else if event.kind.is_advisory() {
        "[~]"
    } else {
        "[*]"
    };
    let transition = if event.old_status == event.new_status {
        event.new_status.to_string()
    } else {
        format!("{} -> {}", event.old_status, event.new_status)
    };
    format!(
        "{marker} {} {} {} {transition}: {}",
        event.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
        event.session_name,
        event.kind,
        event.reason,
    )
}

impl NotificationSink for NoticeSink {
    fn name(&self) -> &str {
        "notice"
    }

    fn publish<'a>(&'a self, event: &'a NotificationEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let line = format_notice(event);
            if event.is_hard_failure() {
                warn!(notice = %line, "session notice");
            } else {
                info!(notice = %line, "session notice");
            }

            let mut out = self
                .out
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            writeln!(out, "{line}")
                .and_then(|()| out.flush())
                .map_err(|err| AppError::Sink(format!("failed to write notice: {err}")))
        })
    }
}
