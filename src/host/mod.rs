//! Process host abstraction.
//!
//! The supervisor never starts worker processes directly; it asks a
//! [`ProcessHost`] to. The host decides how consoles are created and
//! multiplexed. [`pty::PtyHost`] is the production implementation; tests
//! substitute in-memory fakes.

pub mod pty;

use std::collections::HashMap;
use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::{BoxFuture, Result};

pub use pty::PtyHost;

/// Opaque reference to a process started by a host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    /// Host-assigned identifier, unique for the host's lifetime.
    pub id: u64,
    /// OS process identifier when known.
    pub pid: Option<u32>,
}

/// Everything a host needs to start a worker.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Program to run.
    pub command: String,
    /// Program arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Additional environment variables.
    pub env: HashMap<String, String>,
    /// Initial console geometry.
    pub size: TermSize,
}

/// Console geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    /// Row count.
    pub rows: u16,
    /// Column count.
    pub cols: u16,
}

impl Default for TermSize {
    fn default() -> Self {
        Self { rows: 40, cols: 120 }
    }
}

/// How a process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code if the process exited normally.
    pub code: Option<u32>,
    /// Whether the process reported success.
    pub success: bool,
}

/// Callback invoked exactly once when a process terminates.
///
/// May run on a non-async thread; implementations must not block.
pub type ExitCallback = Box<dyn FnOnce(ExitInfo) + Send + 'static>;

/// Live duplex view of a process console.
pub struct ConsoleStream {
    /// Raw output bytes, including escape sequences. Closed when the
    /// process exits or the host drops the console.
    pub output: broadcast::Receiver<Bytes>,
    /// Raw input bytes forwarded verbatim to the console.
    pub input: mpsc::Sender<Bytes>,
}

/// Collaborator that runs worker processes.
pub trait ProcessHost: Send + Sync {
    /// Start a process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SpawnFailed` if the process cannot be started.
    fn start(&self, spec: LaunchSpec) -> BoxFuture<'_, Result<ProcessHandle>>;

    /// Whether the process is still running.
    fn is_alive<'a>(&'a self, handle: &'a ProcessHandle) -> BoxFuture<'a, bool>;

    /// Inject bytes into the process console.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Host` if the console is gone or the write fails.
    fn send_input<'a>(
        &'a self,
        handle: &'a ProcessHandle,
        bytes: &'a [u8],
    ) -> BoxFuture<'a, Result<()>>;

    /// Register a termination callback. Fires immediately if the process
    /// has already exited.
    fn on_exit(&self, handle: &ProcessHandle, callback: ExitCallback);

    /// Full snapshot of the visible console buffer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Host` if the console is unknown.
    fn capture_snapshot<'a>(&'a self, handle: &'a ProcessHandle) -> BoxFuture<'a, Result<Vec<u8>>>;

    /// Open a persistent duplex stream to the console.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Host` if the process is gone.
    fn attach<'a>(&'a self, handle: &'a ProcessHandle) -> BoxFuture<'a, Result<ConsoleStream>>;

    /// Change the console geometry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Host` if the console is gone or the resize fails.
    fn resize<'a>(&'a self, handle: &'a ProcessHandle, size: TermSize)
        -> BoxFuture<'a, Result<()>>;

    /// Stop the process and release its console.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Host` if the process could not be signalled.
    fn stop<'a>(&'a self, handle: &'a ProcessHandle) -> BoxFuture<'a, Result<()>>;
}
