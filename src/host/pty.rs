//! Pseudo-terminal process host.
//!
//! Each worker runs in its own PTY (`portable-pty`). A reader thread feeds
//! raw output into a `vt100` screen (used for snapshots) and a broadcast
//! channel (used by attached viewers). A waiter thread blocks on the child
//! and fires the registered exit callbacks once.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, info_span, warn};

use super::{
    ConsoleStream, ExitCallback, ExitInfo, LaunchSpec, ProcessHandle, ProcessHost, TermSize,
};
use crate::{AppError, BoxFuture, Result};

const OUTPUT_CHANNEL_CAPACITY: usize = 1024;
const INPUT_CHANNEL_CAPACITY: usize = 64;
const READ_BUFFER_BYTES: usize = 8192;
const STOP_GRACE: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(50);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum ExitState {
    Running(Vec<ExitCallback>),
    Exited(ExitInfo),
}

/// One worker console.
struct Console {
    pid: Option<u32>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    screen: Mutex<vt100::Parser>,
    output: Mutex<Option<broadcast::Sender<Bytes>>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    exit: Mutex<ExitState>,
}

impl Console {
    fn is_running(&self) -> bool {
        matches!(*lock(&self.exit), ExitState::Running(_))
    }

    fn write_input(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut writer = lock(&self.writer);
        writer.write_all(bytes)?;
        writer.flush()
    }

    fn record_output(&self, chunk: Bytes) {
        lock(&self.screen).process(&chunk);
        if let Some(tx) = lock(&self.output).as_ref() {
            // No receivers is fine; nobody is attached.
            let _ = tx.send(chunk);
        }
    }

    fn finish(&self, info: ExitInfo) {
        let callbacks = {
            let mut state = lock(&self.exit);
            match std::mem::replace(&mut *state, ExitState::Exited(info.clone())) {
                ExitState::Running(callbacks) => callbacks,
                ExitState::Exited(_) => Vec::new(),
            }
        };
        lock(&self.output).take();
        for callback in callbacks {
            callback(info.clone());
        }
    }

    fn register_exit(&self, callback: ExitCallback) {
        let fire_now = {
            let mut state = lock(&self.exit);
            match &mut *state {
                ExitState::Running(callbacks) => {
                    callbacks.push(callback);
                    None
                }
                ExitState::Exited(info) => Some((callback, info.clone())),
            }
        };
        if let Some((callback, info)) = fire_now {
            callback(info);
        }
    }
}

/// [`ProcessHost`] running each worker inside a pseudo-terminal.
pub struct PtyHost {
    consoles: Mutex<HashMap<u64, Arc<Console>>>,
    next_id: AtomicU64,
}

impl Default for PtyHost {
    fn default() -> Self {
        Self::new()
    }
}

impl PtyHost {
    /// Create an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self {
            consoles: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn console(&self, handle: &ProcessHandle) -> Result<Arc<Console>> {
        lock(&self.consoles)
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| AppError::Host(format!("unknown process {}", handle.id)))
    }

    fn open(&self, spec: &LaunchSpec) -> Result<ProcessHandle> {
        let _span = info_span!(
            "pty_start",
            command = %spec.command,
            cwd = %spec.cwd.display(),
        )
        .entered();

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: spec.size.rows,
                cols: spec.size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| AppError::SpawnFailed(format!("failed to open pty: {err}")))?;

        let mut cmd = CommandBuilder::new(&spec.command);
        cmd.args(&spec.args);
        cmd.cwd(&spec.cwd);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|err| AppError::SpawnFailed(format!("failed to spawn {}: {err}", spec.command)))?;
        // Only the master side is needed from here on.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| AppError::SpawnFailed(format!("failed to clone pty reader: {err}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|err| AppError::SpawnFailed(format!("failed to take pty writer: {err}")))?;

        let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        let pid = child.process_id();
        let console = Arc::new(Console {
            pid,
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            screen: Mutex::new(vt100::Parser::new(spec.size.rows, spec.size.cols, 0)),
            output: Mutex::new(Some(output_tx)),
            killer: Mutex::new(child.clone_killer()),
            exit: Mutex::new(ExitState::Running(Vec::new())),
        });

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.consoles).insert(id, Arc::clone(&console));

        spawn_reader(id, reader, Arc::clone(&console));

        let waiter_console = Arc::clone(&console);
        std::thread::spawn(move || {
            let info = match child.wait() {
                Ok(status) => ExitInfo {
                    code: Some(status.exit_code()),
                    success: status.success(),
                },
                Err(err) => {
                    warn!(process = id, %err, "failed to wait for pty child");
                    ExitInfo {
                        code: None,
                        success: false,
                    }
                }
            };
            info!(process = id, code = ?info.code, "pty child exited");
            waiter_console.finish(info);
        });

        info!(process = id, pid = pid.unwrap_or(0), "pty process started");
        Ok(ProcessHandle { id, pid })
    }
}

fn spawn_reader(id: u64, mut reader: Box<dyn Read + Send>, console: Arc<Console>) {
    std::thread::spawn(move || {
        let mut buf = [0u8; READ_BUFFER_BYTES];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => console.record_output(Bytes::copy_from_slice(&buf[..n])),
                Err(err) => {
                    debug!(process = id, %err, "pty reader stopped");
                    break;
                }
            }
        }
    });
}

#[cfg(unix)]
fn terminate(pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        debug!(pid = raw, %err, "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn terminate(_pid: Option<u32>) {}

impl ProcessHost for PtyHost {
    fn start(&self, spec: LaunchSpec) -> BoxFuture<'_, Result<ProcessHandle>> {
        Box::pin(async move { self.open(&spec) })
    }

    fn is_alive<'a>(&'a self, handle: &'a ProcessHandle) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.console(handle)
                .map(|console| console.is_running())
                .unwrap_or(false)
        })
    }

    fn send_input<'a>(
        &'a self,
        handle: &'a ProcessHandle,
        bytes: &'a [u8],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let console = self.console(handle)?;
            if !console.is_running() {
                return Err(AppError::Host(format!("process {} has exited", handle.id)));
            }
            let data = bytes.to_vec();
            tokio::task::spawn_blocking(move || console.write_input(&data))
                .await
                .map_err(|err| AppError::Host(format!("input task panicked: {err}")))?
                .map_err(|err| AppError::Host(format!("failed to write input: {err}")))
        })
    }

    fn on_exit(&self, handle: &ProcessHandle, callback: ExitCallback) {
        match self.console(handle) {
            Ok(console) => console.register_exit(callback),
            Err(_) => callback(ExitInfo {
                code: None,
                success: false,
            }),
        }
    }

    fn capture_snapshot<'a>(
        &'a self,
        handle: &'a ProcessHandle,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let console = self.console(handle)?;
            let snapshot = lock(&console.screen).screen().contents_formatted();
            Ok(snapshot)
        })
    }

    fn attach<'a>(&'a self, handle: &'a ProcessHandle) -> BoxFuture<'a, Result<ConsoleStream>> {
        Box::pin(async move {
            let console = self.console(handle)?;
            let output = lock(&console.output)
                .as_ref()
                .map(broadcast::Sender::subscribe)
                .ok_or_else(|| AppError::Host(format!("process {} has exited", handle.id)))?;

            let (input_tx, mut input_rx) = mpsc::channel::<Bytes>(INPUT_CHANNEL_CAPACITY);
            let process = handle.id;
            tokio::spawn(async move {
                while let Some(bytes) = input_rx.recv().await {
                    let target = Arc::clone(&console);
                    let written =
                        tokio::task::spawn_blocking(move || target.write_input(&bytes)).await;
                    if !matches!(written, Ok(Ok(()))) {
                        debug!(process, "attached input forwarder stopped");
                        break;
                    }
                }
            });

            Ok(ConsoleStream {
                output,
                input: input_tx,
            })
        })
    }

    fn resize<'a>(
        &'a self,
        handle: &'a ProcessHandle,
        size: TermSize,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if size.rows == 0 || size.cols == 0 {
                return Ok(());
            }
            let console = self.console(handle)?;
            lock(&console.master)
                .resize(PtySize {
                    rows: size.rows,
                    cols: size.cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|err| AppError::Host(format!("failed to resize pty: {err}")))?;
            lock(&console.screen)
                .screen_mut()
                .set_size(size.rows, size.cols);
            debug!(process = handle.id, rows = size.rows, cols = size.cols, "pty resized");
            Ok(())
        })
    }

    fn stop<'a>(&'a self, handle: &'a ProcessHandle) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let Ok(console) = self.console(handle) else {
                return Ok(());
            };

            if console.is_running() {
                terminate(console.pid);
                let deadline = tokio::time::Instant::now() + STOP_GRACE;
                while console.is_running() && tokio::time::Instant::now() < deadline {
                    tokio::time::sleep(STOP_POLL).await;
                }
                if console.is_running() {
                    warn!(process = handle.id, "process ignored SIGTERM, killing");
                    lock(&console.killer)
                        .kill()
                        .map_err(|err| AppError::Host(format!("failed to kill process: {err}")))?;
                }
            }

            lock(&self.consoles).remove(&handle.id);
            info!(process = handle.id, "pty process released");
            Ok(())
        })
    }
}
