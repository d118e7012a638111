//! Per-session mailbox watcher.
//!
//! A `notify` watcher on the mailbox directory nudges a tokio task whenever
//! the mailbox file is created or modified; a periodic rescan covers missed
//! notifications. Each nudge claims the whole mailbox and delivers the batch.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{claim, deliver_batch, recover_orphans};
use crate::orchestrator::registry::SessionRegistry;
use crate::sinks::EventPublisher;
use crate::{AppError, Result};

/// Watches one session's mailbox and delivers claimed messages.
pub struct MailboxWatcher {
    session: String,
    path: PathBuf,
    registry: SessionRegistry,
    events: EventPublisher,
    rescan: Duration,
}

/// Running watcher. Dropping the handle stops the watcher.
pub struct MailboxWatcherHandle {
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl MailboxWatcherHandle {
    /// Stop the watcher and wait for its task to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                warn!(%err, "mailbox watcher task failed");
            }
        }
    }
}

impl Drop for MailboxWatcherHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl MailboxWatcher {
    /// Create a watcher for `session`'s mailbox at `path`.
    #[must_use]
    pub fn new(
        session: impl Into<String>,
        path: PathBuf,
        registry: SessionRegistry,
        events: EventPublisher,
        rescan: Duration,
    ) -> Self {
        Self {
            session: session.into(),
            path,
            registry,
            events,
            rescan,
        }
    }

    /// Start watching.
    ///
    /// If the platform watcher cannot be created the watcher keeps working
    /// on the rescan interval alone.
    #[must_use]
    pub fn spawn(self) -> MailboxWatcherHandle {
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<()>(1);

        let fs_watcher = match watch_file(&self.path, tx.clone()) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(
                    session = %self.session,
                    %err,
                    "mailbox change notifications unavailable; relying on rescans"
                );
                None
            }
        };

        let span = info_span!("mailbox_watcher", session = %self.session);
        let task_cancel = cancel.clone();
        let join = tokio::spawn(
            async move {
                // Held for the task's lifetime.
                let _fs_watcher = fs_watcher;
                let _tx = tx;

                self.recover().await;
                self.drain().await;

                let mut rescan = tokio::time::interval(self.rescan.max(Duration::from_millis(10)));
                rescan.set_missed_tick_behavior(MissedTickBehavior::Skip);
                rescan.tick().await;

                info!(path = %self.path.display(), "mailbox watcher started");
                loop {
                    tokio::select! {
                        () = task_cancel.cancelled() => break,
                        _ = rx.recv() => {}
                        _ = rescan.tick() => {}
                    }
                    self.drain().await;
                }
                info!("mailbox watcher stopped");
            }
            .instrument(span),
        );

        MailboxWatcherHandle {
            cancel,
            join: Some(join),
        }
    }

    async fn recover(&self) {
        match recover_orphans(&self.path).await {
            Ok(messages) if !messages.is_empty() => {
                deliver_batch(&self.registry, &self.events, &self.session, messages).await;
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "failed to recover orphaned mailbox claims"),
        }
    }

    async fn drain(&self) {
        match claim(&self.path).await {
            Ok(messages) if messages.is_empty() => {}
            Ok(messages) => {
                debug!(count = messages.len(), "claimed mailbox batch");
                deliver_batch(&self.registry, &self.events, &self.session, messages).await;
            }
            Err(err) => warn!(%err, "mailbox claim failed"),
        }
    }
}

fn watch_file(path: &Path, tx: mpsc::Sender<()>) -> Result<RecommendedWatcher> {
    let dir = path
        .parent()
        .ok_or_else(|| AppError::Io(format!("mailbox has no parent: {}", path.display())))?;
    let file_name: Option<OsString> = path.file_name().map(ToOwned::to_owned);

    let mut watcher =
        notify::recommended_watcher(move |result: std::result::Result<Event, notify::Error>| {
            match result {
                Ok(event) => {
                    if is_mailbox_event(&event, file_name.as_deref()) {
                        // Full channel means a drain is already pending.
                        let _ = tx.try_send(());
                    }
                }
                Err(err) => warn!(%err, "mailbox watch error"),
            }
        })
        .map_err(|err| AppError::Io(format!("failed to create watcher: {err}")))?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|err| AppError::Io(format!("failed to watch mailbox directory: {err}")))?;
    Ok(watcher)
}

fn is_mailbox_event(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some() && p.file_name() == file_name)
}
