//! Viewer-side connection driver with automatic mode fallback.
//!
//! A connection starts in streaming mode. If the stream cannot be opened,
//! or drops, the viewer waits out a grace period (input typed meanwhile is
//! buffered) and then polls full snapshots for the rest of the connection.
//! Snapshots that differ from the last rendered one replace the viewer's
//! buffer wholesale; identical snapshots produce nothing. Polling-mode
//! input is batched over a short debounce window and resubmitted on
//! failure, so input is never dropped across the switch (it may be
//! delivered twice if a submission fails after the host accepted it).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::protocol::{ClientFrame, ConnectionMode, InputBody, SnapshotBody};
use crate::config::BridgeConfig;
use crate::host::TermSize;
use crate::{AppError, BoxFuture, Result};

const CHANNEL_CAPACITY: usize = 256;

/// Duplex byte channel produced by a [`StreamTransport`].
///
/// The stream is considered dropped once `output` closes or `input` is
/// rejected.
pub struct StreamChannel {
    /// Raw console output.
    pub output: mpsc::Receiver<Bytes>,
    /// Raw input and control frames.
    pub input: mpsc::Sender<ClientFrame>,
}

/// Persistent-mode transport.
pub trait StreamTransport: Send + Sync {
    /// Open a duplex stream to `session`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be established.
    fn open<'a>(&'a self, session: &'a str) -> BoxFuture<'a, Result<StreamChannel>>;
}

/// Polling-mode transport.
pub trait PollTransport: Send + Sync {
    /// Fetch the full visible buffer of `session`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be fetched.
    fn fetch<'a>(&'a self, session: &'a str) -> BoxFuture<'a, Result<SnapshotBody>>;

    /// Inject one batch of input into `session`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input was not accepted.
    fn submit<'a>(&'a self, session: &'a str, body: InputBody) -> BoxFuture<'a, Result<()>>;
}

/// Timing for one viewer connection.
#[derive(Debug, Clone)]
pub struct ViewerOptions {
    /// Wait after a stream failure before polling starts.
    pub grace: Duration,
    /// Snapshot cadence in polling mode.
    pub poll_interval: Duration,
    /// Input batching window in polling mode.
    pub input_debounce: Duration,
    /// Viewer geometry pushed when a stream is established.
    pub size: TermSize,
    /// Consecutive failed fetches before the connection fails.
    pub max_poll_failures: u32,
}

impl ViewerOptions {
    /// Derive options from the `[bridge]` configuration section.
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            grace: Duration::from_millis(config.grace_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            input_debounce: Duration::from_millis(config.input_debounce_ms),
            size: TermSize {
                rows: config.rows,
                cols: config.cols,
            },
            max_poll_failures: config.max_poll_failures.max(1),
        }
    }
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

/// What the viewer should render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerUpdate {
    /// The connection entered a transport mode.
    Mode(ConnectionMode),
    /// Append raw output (streaming mode).
    Output(Bytes),
    /// Discard the buffer and render this snapshot (polling mode).
    Replace(String),
    /// Both modes failed; the connection is over.
    Failed(String),
}

enum ViewerCommand {
    Input(Bytes),
    Resize(TermSize),
}

/// Handle to a running viewer connection.
pub struct ViewerConnection {
    /// Render updates, in order. Closes when the connection ends.
    pub updates: mpsc::Receiver<ViewerUpdate>,
    commands: mpsc::Sender<ViewerCommand>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl ViewerConnection {
    /// Send keyboard input (control sequences included) to the session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StreamDropped` if the connection has ended.
    pub async fn send_input(&self, bytes: impl Into<Bytes>) -> Result<()> {
        self.commands
            .send(ViewerCommand::Input(bytes.into()))
            .await
            .map_err(|_| AppError::StreamDropped("viewer connection closed".into()))
    }

    /// Report a viewer geometry change.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StreamDropped` if the connection has ended.
    pub async fn resize(&self, size: TermSize) -> Result<()> {
        self.commands
            .send(ViewerCommand::Resize(size))
            .await
            .map_err(|_| AppError::StreamDropped("viewer connection closed".into()))
    }

    /// Close the connection and wait for the driver to finish.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(err) = self.join.await {
            warn!(%err, "viewer driver task failed");
        }
    }
}

/// Drives one viewer connection for one session.
pub struct TerminalViewer {
    session: String,
    stream: Arc<dyn StreamTransport>,
    poll: Arc<dyn PollTransport>,
    options: ViewerOptions,
}

enum StreamEnd {
    Dropped,
    Finished,
}

impl TerminalViewer {
    /// Create a viewer for `session`.
    #[must_use]
    pub fn new(
        session: impl Into<String>,
        stream: Arc<dyn StreamTransport>,
        poll: Arc<dyn PollTransport>,
        options: ViewerOptions,
    ) -> Self {
        Self {
            session: session.into(),
            stream,
            poll,
            options,
        }
    }

    /// Start the connection.
    #[must_use]
    pub fn connect(self) -> ViewerConnection {
        let (updates_tx, updates) = mpsc::channel(CHANNEL_CAPACITY);
        let (commands, commands_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let span = info_span!("viewer", session = %self.session);
        let driver_cancel = cancel.clone();
        let join = tokio::spawn(
            async move { self.run(commands_rx, updates_tx, driver_cancel).await }.instrument(span),
        );

        ViewerConnection {
            updates,
            commands,
            cancel,
            join,
        }
    }

    async fn run(
        self,
        mut commands: mpsc::Receiver<ViewerCommand>,
        updates: mpsc::Sender<ViewerUpdate>,
        cancel: CancellationToken,
    ) {
        let mut size = self.options.size;
        let mut pending: Vec<Bytes> = Vec::new();

        match self.stream.open(&self.session).await {
            Ok(channel) => {
                if updates.send(ViewerUpdate::Mode(ConnectionMode::Streaming)).await.is_err() {
                    return;
                }
                match self
                    .stream_phase(channel, &mut commands, &updates, &cancel, &mut size, &mut pending)
                    .await
                {
                    StreamEnd::Finished => return,
                    StreamEnd::Dropped => warn!("stream dropped"),
                }
            }
            Err(err) => warn!(%err, "stream unavailable"),
        }

        // Grace period: keep collecting input, then fall back.
        let grace = tokio::time::sleep(self.options.grace);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = &mut grace => break,
                command = commands.recv() => match command {
                    Some(ViewerCommand::Input(bytes)) => pending.push(bytes),
                    Some(ViewerCommand::Resize(next)) => {
                        debug!(rows = next.rows, cols = next.cols, "resize ignored during fallback");
                    }
                    None => return,
                },
            }
        }

        info!("switching to polling mode");
        if updates.send(ViewerUpdate::Mode(ConnectionMode::Polling)).await.is_err() {
            return;
        }
        self.poll_phase(commands, updates, cancel, pending).await;
    }

    async fn stream_phase(
        &self,
        mut channel: StreamChannel,
        commands: &mut mpsc::Receiver<ViewerCommand>,
        updates: &mpsc::Sender<ViewerUpdate>,
        cancel: &CancellationToken,
        size: &mut TermSize,
        pending: &mut Vec<Bytes>,
    ) -> StreamEnd {
        if channel.input.send(ClientFrame::Resize(*size)).await.is_err() {
            return StreamEnd::Dropped;
        }
        debug!(rows = size.rows, cols = size.cols, "pushed viewer geometry");

        loop {
            tokio::select! {
                () = cancel.cancelled() => return StreamEnd::Finished,
                chunk = channel.output.recv() => match chunk {
                    Some(bytes) => {
                        if updates.send(ViewerUpdate::Output(bytes)).await.is_err() {
                            return StreamEnd::Finished;
                        }
                    }
                    None => return StreamEnd::Dropped,
                },
                command = commands.recv() => match command {
                    Some(ViewerCommand::Input(bytes)) => {
                        if let Err(err) = channel.input.send(ClientFrame::Input(bytes)).await {
                            if let ClientFrame::Input(unsent) = err.0 {
                                pending.push(unsent);
                            }
                            return StreamEnd::Dropped;
                        }
                    }
                    Some(ViewerCommand::Resize(next)) => {
                        *size = next;
                        if channel.input.send(ClientFrame::Resize(next)).await.is_err() {
                            return StreamEnd::Dropped;
                        }
                    }
                    None => return StreamEnd::Finished,
                },
            }
        }
    }

    async fn poll_phase(
        &self,
        mut commands: mpsc::Receiver<ViewerCommand>,
        updates: mpsc::Sender<ViewerUpdate>,
        cancel: CancellationToken,
        mut pending: Vec<Bytes>,
    ) {
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rendered: Option<String> = None;
        let mut failures = 0u32;
        let mut flush_at = (!pending.is_empty()).then(Instant::now);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => match self.poll.fetch(&self.session).await {
                    Ok(snapshot) => {
                        failures = 0;
                        if rendered.as_deref() != Some(snapshot.content.as_str()) {
                            rendered = Some(snapshot.content.clone());
                            if updates.send(ViewerUpdate::Replace(snapshot.content)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        failures += 1;
                        warn!(%err, failures, "snapshot fetch failed");
                        if failures >= self.options.max_poll_failures {
                            let reason = AppError::StreamDropped(format!(
                                "streaming unavailable and {failures} snapshot fetches failed: {err}"
                            ));
                            let _ = updates.send(ViewerUpdate::Failed(reason.to_string())).await;
                            return;
                        }
                    }
                },
                () = wait_until(flush_at) => {
                    let data: Vec<u8> = pending.iter().flat_map(|chunk| chunk.iter().copied()).collect();
                    let body = InputBody {
                        data: String::from_utf8_lossy(&data).into_owned(),
                    };
                    match self.poll.submit(&self.session, body).await {
                        Ok(()) => {
                            pending.clear();
                            flush_at = None;
                        }
                        Err(err) => {
                            warn!(%err, "input submission failed; will retry");
                            flush_at = Some(Instant::now() + self.options.poll_interval);
                        }
                    }
                }
                command = commands.recv() => match command {
                    Some(ViewerCommand::Input(bytes)) => {
                        pending.push(bytes);
                        if flush_at.is_none() {
                            flush_at = Some(Instant::now() + self.options.input_debounce);
                        }
                    }
                    Some(ViewerCommand::Resize(size)) => {
                        debug!(rows = size.rows, cols = size.cols, "resize ignored while polling");
                    }
                    None => return,
                },
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
