//! Session registry: the single owner of every session record.
//!
//! The registry binds each session name to its workspace, its process
//! handle and its declared status. Every mutation of a session goes through
//! a method here; mailbox watchers, the reconciler and the terminal bridge
//! only send requests.
//!
//! Each spawn or respawn bumps the entry's generation. Process exit
//! callbacks and reconciler samples carry the generation they were taken
//! under, so results from an earlier incarnation are ignored.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{GlobalConfig, WorkerConfig};
use crate::host::{ConsoleStream, ExitInfo, LaunchSpec, ProcessHandle, ProcessHost, TermSize};
use crate::mailbox::{MailboxWatcher, MailboxWatcherHandle};
use crate::models::event::{EventKind, NotificationEvent};
use crate::models::session::{is_valid_name, NotifiedFlags, Session, SessionStatus, StatusChange};
use crate::sinks::EventPublisher;
use crate::workspace::WorkspaceProvisioner;
use crate::{AppError, Result};

/// Environment variable carrying the session name into the worker.
pub const SESSION_ENV: &str = "ORC_SESSION";
/// Environment variable carrying the absolute mailbox path into the worker.
pub const MAILBOX_ENV: &str = "ORC_MAILBOX";

/// Static settings the registry needs from configuration.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Name of the protected primary session.
    pub primary_session: String,
    /// Root workspace the primary session runs in.
    pub root_workspace: PathBuf,
    /// Mailbox location relative to each workspace.
    pub mailbox_path: PathBuf,
    /// Worker launch settings.
    pub worker: WorkerConfig,
    /// Ref new workspaces branch from.
    pub base_ref: String,
    /// Initial console geometry.
    pub console_size: TermSize,
    /// Mailbox fallback rescan interval.
    pub mailbox_rescan: Duration,
}

impl RegistryOptions {
    /// Derive registry options from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            primary_session: config.primary_session.clone(),
            root_workspace: config.root_workspace.clone(),
            mailbox_path: config.mailbox_path.clone(),
            worker: config.worker.clone(),
            base_ref: config.workspaces.base_ref.clone(),
            console_size: TermSize {
                rows: config.bridge.rows,
                cols: config.bridge.cols,
            },
            mailbox_rescan: config.mailbox.rescan_interval(),
        }
    }
}

/// A session as seen by the reconciler: the record plus what it needs to probe.
#[derive(Debug, Clone)]
pub struct ReconcileTarget {
    /// Copy of the session record.
    pub session: Session,
    /// Current process handle, if one is attached.
    pub process: Option<ProcessHandle>,
    /// Incarnation the handle belongs to.
    pub generation: u64,
}

/// A live console attachment scoped to the session's lifetime.
pub struct Attachment {
    /// Duplex console stream.
    pub stream: ConsoleStream,
    /// Cancelled when the session is torn down or the registry shuts down.
    pub closed: CancellationToken,
}

struct SessionEntry {
    session: Session,
    process: Option<ProcessHandle>,
    generation: u64,
    mailbox: Option<MailboxWatcherHandle>,
    cancel: CancellationToken,
    owns_workspace: bool,
}

struct RegistryInner {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    host: Arc<dyn ProcessHost>,
    workspaces: Arc<dyn WorkspaceProvisioner>,
    events: EventPublisher,
    options: RegistryOptions,
    next_generation: AtomicU64,
}

/// Cloneable handle to the shared session table.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(
        host: Arc<dyn ProcessHost>,
        workspaces: Arc<dyn WorkspaceProvisioner>,
        events: EventPublisher,
        options: RegistryOptions,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
                host,
                workspaces,
                events,
                options,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Process host backing every session.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn ProcessHost> {
        &self.inner.host
    }

    /// Publisher shared with mailbox watchers and the reconciler.
    #[must_use]
    pub fn events(&self) -> &EventPublisher {
        &self.inner.events
    }

    /// Absolute mailbox path for a workspace.
    #[must_use]
    pub fn mailbox_file(&self, workspace: &Path) -> PathBuf {
        workspace.join(&self.inner.options.mailbox_path)
    }

    // ── Queries ──────────────────────────────────────────────

    /// Copy of one session record.
    pub async fn get(&self, name: &str) -> Option<Session> {
        self.inner
            .sessions
            .read()
            .await
            .get(name)
            .map(|entry| entry.session.clone())
    }

    /// Every session record, sorted by name.
    pub async fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .inner
            .sessions
            .read()
            .await
            .values()
            .map(|entry| entry.session.clone())
            .collect();
        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        sessions
    }

    /// Snapshot of every session for one reconciliation pass.
    pub async fn reconcile_targets(&self) -> Vec<ReconcileTarget> {
        let mut targets: Vec<ReconcileTarget> = self
            .inner
            .sessions
            .read()
            .await
            .values()
            .map(|entry| ReconcileTarget {
                session: entry.session.clone(),
                process: entry.process.clone(),
                generation: entry.generation,
            })
            .collect();
        targets.sort_by(|a, b| a.session.name.cmp(&b.session.name));
        targets
    }

    /// Current incarnation of a session, if it exists.
    pub async fn generation(&self, name: &str) -> Option<u64> {
        self.inner
            .sessions
            .read()
            .await
            .get(name)
            .map(|entry| entry.generation)
    }

    /// Observed liveness of a session's process; `false` when there is none.
    pub async fn is_alive(&self, name: &str) -> bool {
        match self.process_of(name).await {
            Ok(process) => self.inner.host.is_alive(&process).await,
            Err(_) => false,
        }
    }

    async fn process_of(&self, name: &str) -> Result<ProcessHandle> {
        let sessions = self.inner.sessions.read().await;
        let entry = sessions
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("session {name}")))?;
        entry
            .process
            .clone()
            .ok_or_else(|| AppError::Host(format!("session {name} has no process")))
    }

    // ── Lifecycle ────────────────────────────────────────────

    /// Bind `name` to a new worker process running in `workspace`.
    ///
    /// The caller keeps ownership of `workspace`; teardown never removes it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidName` for a malformed name,
    /// `AppError::AlreadyExists` if the name is taken, and
    /// `AppError::SpawnFailed` if the worker cannot be started. A failed
    /// spawn leaves no record behind.
    pub async fn spawn(&self, name: &str, workspace: &Path) -> Result<Session> {
        let span = info_span!("spawn_session", session = name);
        self.spawn_inner(name, workspace.to_path_buf(), false)
            .instrument(span)
            .await
    }

    /// Spawn the primary session in the root workspace.
    ///
    /// # Errors
    ///
    /// Same as [`SessionRegistry::spawn`].
    pub async fn spawn_primary(&self) -> Result<Session> {
        let name = self.inner.options.primary_session.clone();
        let root = self.inner.options.root_workspace.clone();
        let span = info_span!("spawn_primary", session = %name);
        self.spawn_inner(&name, root, false).instrument(span).await
    }

    /// Provision a fresh workspace for `name` and spawn a worker in it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidName` or `AppError::AlreadyExists` before
    /// anything is provisioned, `AppError::Workspace` if provisioning fails,
    /// and `AppError::SpawnFailed` if the worker cannot be started (the new
    /// workspace is removed again).
    pub async fn create(&self, name: &str) -> Result<Session> {
        let span = info_span!("create_session", session = name);
        async move {
            self.check_new_name(name).await?;

            let workspace = self
                .inner
                .workspaces
                .create_workspace(name, &self.inner.options.base_ref)
                .await?;
            info!(workspace = %workspace.display(), "workspace provisioned");

            match self.spawn_inner(name, workspace.clone(), true).await {
                Ok(session) => Ok(session),
                Err(err) => {
                    if let Err(cleanup) = self.inner.workspaces.remove_workspace(&workspace, true).await
                    {
                        warn!(%cleanup, "failed to remove workspace after failed spawn");
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn check_new_name(&self, name: &str) -> Result<()> {
        let allow_reserved = name == self.inner.options.primary_session;
        if !is_valid_name(name, allow_reserved) {
            return Err(AppError::InvalidName(format!(
                "{name:?}: names must be non-empty, contain no whitespace or '/', \
                 and only the primary session may start with '@'"
            )));
        }
        if self.inner.sessions.read().await.contains_key(name) {
            return Err(AppError::AlreadyExists(format!("session {name}")));
        }
        Ok(())
    }

    async fn spawn_inner(&self, name: &str, workspace: PathBuf, owns_workspace: bool) -> Result<Session> {
        self.check_new_name(name).await?;

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut sessions = self.inner.sessions.write().await;
            if sessions.contains_key(name) {
                return Err(AppError::AlreadyExists(format!("session {name}")));
            }
            sessions.insert(
                name.to_owned(),
                SessionEntry {
                    session: Session::new(name.to_owned(), workspace.clone()),
                    process: None,
                    generation,
                    mailbox: None,
                    cancel: CancellationToken::new(),
                    owns_workspace,
                },
            );
        }

        match self.launch(name, &workspace, generation, "spawned").await {
            Ok(session) => Ok(session),
            Err(err) => {
                let mut sessions = self.inner.sessions.write().await;
                if sessions.get(name).is_some_and(|e| e.generation == generation) {
                    sessions.remove(name);
                }
                warn!(%err, "spawn failed");
                Err(err)
            }
        }
    }

    /// Start a new worker for an `exited` session, keeping its name and workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown name,
    /// `AppError::InvalidTransition` if the session is not `exited`, and
    /// `AppError::SpawnFailed` if the worker cannot be started (the session
    /// stays `exited`).
    pub async fn respawn(&self, name: &str) -> Result<Session> {
        let span = info_span!("respawn_session", session = name);
        async move {
            let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
            let (workspace, old_process, old_mailbox) = {
                let mut sessions = self.inner.sessions.write().await;
                let entry = sessions
                    .get_mut(name)
                    .ok_or_else(|| AppError::NotFound(format!("session {name}")))?;
                let status = entry.session.declared_status;
                if status != SessionStatus::Exited {
                    return Err(AppError::InvalidTransition(format!(
                        "{name} is {status}; only exited sessions can be respawned"
                    )));
                }
                entry.generation = generation;
                entry.session.declared_status = SessionStatus::Spawning;
                entry.session.last_status_change_time = Utc::now();
                entry.session.last_activity_signature = None;
                entry.session.notified_flags = NotifiedFlags::default();
                (
                    entry.session.workspace_path.clone(),
                    entry.process.take(),
                    entry.mailbox.take(),
                )
            };

            if let Some(mailbox) = old_mailbox {
                mailbox.stop().await;
            }
            if let Some(process) = old_process {
                self.release(&process).await;
            }

            match self.launch(name, &workspace, generation, "respawned").await {
                Ok(session) => Ok(session),
                Err(err) => {
                    let mut sessions = self.inner.sessions.write().await;
                    if let Some(entry) = sessions.get_mut(name).filter(|e| e.generation == generation) {
                        entry.session.declared_status = SessionStatus::Exited;
                        entry.session.last_status_change_time = Utc::now();
                    }
                    warn!(%err, "respawn failed");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Start the worker for an entry already inserted in `spawning`.
    async fn launch(
        &self,
        name: &str,
        workspace: &Path,
        generation: u64,
        reason: &str,
    ) -> Result<Session> {
        let mailbox = self.mailbox_file(workspace);
        crate::mailbox::ensure_mailbox(&mailbox)
            .await
            .map_err(|err| AppError::SpawnFailed(format!("failed to prepare mailbox: {err}")))?;

        let spec = self.launch_spec(name, workspace, &mailbox);
        let handle = self.inner.host.start(spec).await.map_err(|err| match err {
            AppError::SpawnFailed(msg) => AppError::SpawnFailed(msg),
            other => AppError::SpawnFailed(other.to_string()),
        })?;

        let session = {
            let mut sessions = self.inner.sessions.write().await;
            if let Some(entry) = sessions.get_mut(name).filter(|e| e.generation == generation) {
                entry.process = Some(handle.clone());
                entry.session.declared_status = SessionStatus::Active;
                entry.session.last_status_change_time = Utc::now();
                Some(entry.session.clone())
            } else {
                None
            }
        };
        let Some(session) = session else {
            self.release(&handle).await;
            return Err(AppError::SpawnFailed(format!(
                "session {name} was removed while starting"
            )));
        };

        info!(process = handle.id, "session active");
        self.inner
            .events
            .publish(NotificationEvent::new(
                name,
                EventKind::StatusChange,
                SessionStatus::Spawning,
                SessionStatus::Active,
                reason,
            ))
            .await;

        // Started only once the session is active so early messages apply.
        let watcher = MailboxWatcher::new(
            name,
            mailbox,
            self.clone(),
            self.inner.events.clone(),
            self.inner.options.mailbox_rescan,
        )
        .spawn();
        {
            let mut sessions = self.inner.sessions.write().await;
            if let Some(entry) = sessions.get_mut(name).filter(|e| e.generation == generation) {
                entry.mailbox = Some(watcher);
            }
        }

        self.watch_exit(name, &handle, generation);

        Ok(session)
    }

    fn launch_spec(&self, name: &str, workspace: &Path, mailbox: &Path) -> LaunchSpec {
        let worker = &self.inner.options.worker;
        let mut env = worker.env.clone();
        env.insert(SESSION_ENV.into(), name.into());
        env.insert(MAILBOX_ENV.into(), mailbox.display().to_string());
        LaunchSpec {
            command: worker.command.clone(),
            args: worker.args.clone(),
            cwd: workspace.to_path_buf(),
            env,
            size: self.inner.options.console_size,
        }
    }

    fn watch_exit(&self, name: &str, handle: &ProcessHandle, generation: u64) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session = name, "no runtime to observe process exit");
            return;
        };
        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let name = name.to_owned();
        self.inner.host.on_exit(
            handle,
            Box::new(move |info| {
                runtime.spawn(async move {
                    if let Some(inner) = weak.upgrade() {
                        SessionRegistry { inner }
                            .observe_exit(&name, generation, info)
                            .await;
                    }
                });
            }),
        );
    }

    async fn observe_exit(&self, name: &str, generation: u64, info: ExitInfo) {
        let old = {
            let mut sessions = self.inner.sessions.write().await;
            let Some(entry) = sessions.get_mut(name) else {
                debug!(session = name, "exit for removed session ignored");
                return;
            };
            if entry.generation != generation {
                debug!(session = name, generation, "exit from earlier incarnation ignored");
                return;
            }
            let old = entry.session.declared_status;
            if old == SessionStatus::Exited {
                return;
            }
            entry.session.declared_status = SessionStatus::Exited;
            entry.session.last_status_change_time = Utc::now();
            entry.session.notified_flags = NotifiedFlags::default();
            old
        };

        let reason = match info.code {
            Some(code) => format!("process exited (code {code})"),
            None => "process exited".to_owned(),
        };
        info!(session = name, %reason, "worker process exited");
        self.inner
            .events
            .publish(NotificationEvent::new(
                name,
                EventKind::StatusChange,
                old,
                SessionStatus::Exited,
                reason,
            ))
            .await;
    }

    /// Destroy a session: stop its worker, remove its record and release
    /// its workspace if the registry provisioned it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protected` for the primary session (checked before
    /// anything else), `AppError::NotFound` for an unknown name, and
    /// `AppError::DirtyWorkspace` when the workspace has uncommitted changes
    /// and `force` is false. A refused teardown changes nothing.
    pub async fn teardown(&self, name: &str, force: bool) -> Result<()> {
        let span = info_span!("teardown_session", session = name, force);
        async move {
            if name == self.inner.options.primary_session {
                return Err(AppError::Protected(format!(
                    "{name} is the primary session"
                )));
            }

            let workspace = {
                let sessions = self.inner.sessions.read().await;
                let entry = sessions
                    .get(name)
                    .ok_or_else(|| AppError::NotFound(format!("session {name}")))?;
                entry.session.workspace_path.clone()
            };

            if !force && self.inner.workspaces.workspace_is_dirty(&workspace).await? {
                return Err(AppError::DirtyWorkspace(format!(
                    "{} has uncommitted changes",
                    workspace.display()
                )));
            }

            let entry = self
                .inner
                .sessions
                .write()
                .await
                .remove(name)
                .ok_or_else(|| AppError::NotFound(format!("session {name}")))?;

            entry.cancel.cancel();
            if let Some(mailbox) = entry.mailbox {
                mailbox.stop().await;
            }
            if let Some(process) = entry.process {
                self.release(&process).await;
            }
            if entry.owns_workspace {
                if let Err(err) = self.inner.workspaces.remove_workspace(&workspace, force).await {
                    warn!(%err, "failed to remove workspace");
                }
            }

            info!("session torn down");
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn release(&self, process: &ProcessHandle) {
        if let Err(err) = self.inner.host.stop(process).await {
            warn!(process = process.id, %err, "failed to stop worker process");
        }
    }

    // ── Status ───────────────────────────────────────────────

    /// Request a declared status for a session.
    ///
    /// Requesting the current status succeeds with an unchanged
    /// [`StatusChange`]. Advisory flags reset whenever the status moves.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown name and
    /// `AppError::InvalidTransition` when the lifecycle forbids the move.
    pub async fn set_status(&self, name: &str, status: SessionStatus) -> Result<StatusChange> {
        let mut sessions = self.inner.sessions.write().await;
        let entry = sessions
            .get_mut(name)
            .ok_or_else(|| AppError::NotFound(format!("session {name}")))?;
        Self::apply_status(name, entry, status)
    }

    /// Like [`set_status`](Self::set_status), but only while the session is
    /// still the incarnation `generation`.
    ///
    /// Returns `Ok(None)` without touching the record when the session has
    /// been respawned since.
    ///
    /// # Errors
    ///
    /// Same as [`set_status`](Self::set_status).
    pub async fn set_status_if(
        &self,
        name: &str,
        generation: u64,
        status: SessionStatus,
    ) -> Result<Option<StatusChange>> {
        let mut sessions = self.inner.sessions.write().await;
        let entry = sessions
            .get_mut(name)
            .ok_or_else(|| AppError::NotFound(format!("session {name}")))?;
        if entry.generation != generation {
            debug!(session = name, expected = generation, current = entry.generation, "stale status request");
            return Ok(None);
        }
        Self::apply_status(name, entry, status).map(Some)
    }

    fn apply_status(name: &str, entry: &mut SessionEntry, status: SessionStatus) -> Result<StatusChange> {
        let old = entry.session.declared_status;
        if old == status {
            return Ok(StatusChange { old, new: status });
        }
        if status == SessionStatus::Spawning || !old.can_transition_to(status) {
            return Err(AppError::InvalidTransition(format!("{name}: {old} -> {status}")));
        }

        entry.session.declared_status = status;
        entry.session.last_status_change_time = Utc::now();
        entry.session.notified_flags = NotifiedFlags::default();
        debug!(session = name, %old, new = %status, "status updated");
        Ok(StatusChange { old, new: status })
    }

    /// Record the latest observed activity signature.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown name.
    pub async fn record_activity(&self, name: &str, signature: Option<String>) -> Result<()> {
        let mut sessions = self.inner.sessions.write().await;
        let entry = sessions
            .get_mut(name)
            .ok_or_else(|| AppError::NotFound(format!("session {name}")))?;
        entry.session.last_activity_signature = signature;
        Ok(())
    }

    /// Replace the advisory notification flags.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown name.
    pub async fn set_notified(&self, name: &str, flags: NotifiedFlags) -> Result<()> {
        let mut sessions = self.inner.sessions.write().await;
        let entry = sessions
            .get_mut(name)
            .ok_or_else(|| AppError::NotFound(format!("session {name}")))?;
        entry.session.notified_flags = flags;
        Ok(())
    }

    // ── Console access ───────────────────────────────────────

    /// Type `bytes` into one session's console.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown name and `AppError::Host`
    /// if the console rejects the input.
    pub async fn send_input(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let process = self.process_of(name).await?;
        self.inner.host.send_input(&process, bytes).await
    }

    /// Type `bytes` into every running session's console.
    ///
    /// Returns the names that accepted the input. Failures are logged.
    pub async fn broadcast_input(&self, bytes: &[u8]) -> Vec<String> {
        let targets: Vec<(String, ProcessHandle)> = self
            .inner
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.session.declared_status != SessionStatus::Exited)
            .filter_map(|(name, entry)| entry.process.clone().map(|p| (name.clone(), p)))
            .collect();

        let mut delivered = Vec::new();
        for (name, process) in targets {
            match self.inner.host.send_input(&process, bytes).await {
                Ok(()) => delivered.push(name),
                Err(err) => warn!(session = %name, %err, "broadcast input failed"),
            }
        }
        delivered.sort();
        delivered
    }

    /// Snapshot of one session's visible console.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown name and `AppError::Host`
    /// if the console is gone.
    pub async fn capture(&self, name: &str) -> Result<Vec<u8>> {
        let process = self.process_of(name).await?;
        self.inner.host.capture_snapshot(&process).await
    }

    /// Open a duplex console stream bound to the session's lifetime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown name and `AppError::Host`
    /// if the console cannot be attached.
    pub async fn attach(&self, name: &str) -> Result<Attachment> {
        let (process, closed) = {
            let sessions = self.inner.sessions.read().await;
            let entry = sessions
                .get(name)
                .ok_or_else(|| AppError::NotFound(format!("session {name}")))?;
            let process = entry
                .process
                .clone()
                .ok_or_else(|| AppError::Host(format!("session {name} has no process")))?;
            (process, entry.cancel.child_token())
        };
        let stream = self.inner.host.attach(&process).await?;
        Ok(Attachment { stream, closed })
    }

    /// Resize one session's console.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown name and `AppError::Host`
    /// if the resize fails.
    pub async fn resize(&self, name: &str, size: TermSize) -> Result<()> {
        let process = self.process_of(name).await?;
        self.inner.host.resize(&process, size).await
    }

    /// Stop every watcher and worker, closing all viewer connections.
    ///
    /// Records stay in place; the registry is unusable for new work afterwards.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Option<MailboxWatcherHandle>, Option<ProcessHandle>)> = {
            let mut sessions = self.inner.sessions.write().await;
            sessions
                .iter_mut()
                .map(|(name, entry)| {
                    entry.cancel.cancel();
                    (name.clone(), entry.mailbox.take(), entry.process.clone())
                })
                .collect()
        };

        for (name, mailbox, process) in drained {
            if let Some(mailbox) = mailbox {
                mailbox.stop().await;
            }
            if let Some(process) = process {
                debug!(session = %name, "stopping worker for shutdown");
                self.release(&process).await;
            }
        }
        info!("session registry shut down");
    }
}
