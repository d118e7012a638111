//! Transport implementations for [`TerminalViewer`](super::viewer::TerminalViewer).
//!
//! [`LocalTransport`] talks to an in-process registry; the remote pair
//! ([`WsStreamTransport`], [`HttpPollTransport`]) talks to a bridge server.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::protocol::{ClientFrame, ControlFrame, InputBody, SnapshotBody};
use super::viewer::{PollTransport, StreamChannel, StreamTransport};
use crate::orchestrator::registry::SessionRegistry;
use crate::{AppError, BoxFuture, Result};

const CHANNEL_CAPACITY: usize = 256;

// ── In-process ───────────────────────────────────────────────

/// Both transport modes served directly from a [`SessionRegistry`].
#[derive(Clone)]
pub struct LocalTransport {
    registry: SessionRegistry,
}

impl LocalTransport {
    /// Wrap a registry.
    #[must_use]
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }
}

impl StreamTransport for LocalTransport {
    fn open<'a>(&'a self, session: &'a str) -> BoxFuture<'a, Result<StreamChannel>> {
        Box::pin(async move {
            let attachment = self.registry.attach(session).await?;
            let closed = attachment.closed;
            let mut console_output = attachment.stream.output;
            let console_input = attachment.stream.input;

            let (output_tx, output) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
            let (input, mut input_rx) = mpsc::channel::<ClientFrame>(CHANNEL_CAPACITY);

            let out_closed = closed.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = out_closed.cancelled() => break,
                        chunk = console_output.recv() => match chunk {
                            Ok(bytes) => {
                                if output_tx.send(bytes).await.is_err() {
                                    break;
                                }
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(skipped, "local viewer fell behind console output");
                            }
                            Err(RecvError::Closed) => break,
                        },
                    }
                }
            });

            let registry = self.registry.clone();
            let name = session.to_owned();
            tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        () = closed.cancelled() => break,
                        frame = input_rx.recv() => match frame {
                            Some(frame) => frame,
                            None => break,
                        },
                    };
                    match frame {
                        ClientFrame::Input(bytes) => {
                            if console_input.send(bytes).await.is_err() {
                                break;
                            }
                        }
                        ClientFrame::Resize(size) => {
                            if let Err(err) = registry.resize(&name, size).await {
                                debug!(session = %name, %err, "local resize failed");
                            }
                        }
                    }
                }
            });

            Ok(StreamChannel { output, input })
        })
    }
}

impl PollTransport for LocalTransport {
    fn fetch<'a>(&'a self, session: &'a str) -> BoxFuture<'a, Result<SnapshotBody>> {
        Box::pin(async move {
            let bytes = self.registry.capture(session).await?;
            Ok(SnapshotBody {
                content: String::from_utf8_lossy(&bytes).into_owned(),
            })
        })
    }

    fn submit<'a>(&'a self, session: &'a str, body: InputBody) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.registry.send_input(session, body.data.as_bytes()).await })
    }
}

// ── Remote ───────────────────────────────────────────────────

/// Persistent mode over the bridge server's WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WsStreamTransport {
    base_url: String,
}

impl WsStreamTransport {
    /// `base_url` is the server root, e.g. `ws://127.0.0.1:7778`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

impl StreamTransport for WsStreamTransport {
    fn open<'a>(&'a self, session: &'a str) -> BoxFuture<'a, Result<StreamChannel>> {
        Box::pin(async move {
            let url = format!("{}/terminal/{session}/ws", self.base_url);
            let (socket, _) = connect_async(url.as_str())
                .await
                .map_err(|err| AppError::StreamDropped(format!("connect {url}: {err}")))?;
            let (mut sink, mut source) = socket.split();

            let (output_tx, output) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
            let (input, mut input_rx) = mpsc::channel::<ClientFrame>(CHANNEL_CAPACITY);

            tokio::spawn(async move {
                while let Some(message) = source.next().await {
                    let bytes = match message {
                        Ok(Message::Binary(bytes)) => bytes,
                        Ok(Message::Text(text)) => Bytes::copy_from_slice(text.as_str().as_bytes()),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => continue,
                        Err(err) => {
                            debug!(%err, "websocket stream ended");
                            break;
                        }
                    };
                    if output_tx.send(bytes).await.is_err() {
                        break;
                    }
                }
            });

            tokio::spawn(async move {
                while let Some(frame) = input_rx.recv().await {
                    let message = match frame {
                        ClientFrame::Input(bytes) => Message::binary(bytes),
                        ClientFrame::Resize(size) => match ControlFrame::resize(size).to_json() {
                            Ok(text) => Message::text(text),
                            Err(err) => {
                                warn!(%err, "failed to encode resize frame");
                                continue;
                            }
                        },
                    };
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            Ok(StreamChannel { output, input })
        })
    }
}

/// Polling mode over the bridge server's snapshot and input endpoints.
#[derive(Debug, Clone)]
pub struct HttpPollTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPollTransport {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:7778`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

impl PollTransport for HttpPollTransport {
    fn fetch<'a>(&'a self, session: &'a str) -> BoxFuture<'a, Result<SnapshotBody>> {
        Box::pin(async move {
            let url = format!("{}/terminal/{session}/snapshot", self.base_url);
            self.client
                .get(&url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|err| AppError::StreamDropped(format!("fetch {url}: {err}")))?
                .json::<SnapshotBody>()
                .await
                .map_err(|err| AppError::StreamDropped(format!("decode snapshot: {err}")))
        })
    }

    fn submit<'a>(&'a self, session: &'a str, body: InputBody) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = format!("{}/terminal/{session}/input", self.base_url);
            self.client
                .post(&url)
                .json(&body)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|err| AppError::StreamDropped(format!("submit {url}: {err}")))?;
            Ok(())
        })
    }
}
