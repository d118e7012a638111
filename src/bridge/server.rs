//! HTTP / WebSocket surface of the terminal bridge.
//!
//! Routes:
//! - `GET  /health`
//! - `GET  /sessions` (records plus observed liveness)
//! - `GET  /terminal/{name}/ws` (persistent mode)
//! - `GET  /terminal/{name}/snapshot` (polling mode, `{content}`)
//! - `POST /terminal/{name}/input` (polling mode, `{data}`)

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::protocol::{ControlFrame, InputBody, SessionSummary, SnapshotBody};
use crate::host::TermSize;
use crate::orchestrator::registry::{Attachment, SessionRegistry};
use crate::{AppError, Result};

#[derive(Clone)]
struct BridgeState {
    registry: SessionRegistry,
}

/// Build the bridge router over `registry`.
#[must_use]
pub fn router(registry: SessionRegistry) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", get(list_sessions))
        .route("/terminal/{name}/ws", get(terminal_ws))
        .route("/terminal/{name}/snapshot", get(terminal_snapshot))
        .route("/terminal/{name}/input", post(terminal_input))
        .with_state(BridgeState { registry })
}

/// Serve the bridge on `listener` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails.
pub async fn serve(listener: TcpListener, registry: SessionRegistry, ct: CancellationToken) -> Result<()> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    info!(?addr, "starting terminal bridge");

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("terminal bridge error: {err}")))?;

    info!("terminal bridge shut down");
    Ok(())
}

fn error_response(err: &AppError) -> Response {
    let status = match err {
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::Host(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}

async fn health() -> &'static str {
    "ok"
}

async fn list_sessions(State(state): State<BridgeState>) -> Json<Vec<SessionSummary>> {
    let mut rows = Vec::new();
    for session in state.registry.list().await {
        let alive = state.registry.is_alive(&session.name).await;
        rows.push(SessionSummary {
            name: session.name,
            status: session.declared_status,
            workspace_path: session.workspace_path.display().to_string(),
            alive,
        });
    }
    Json(rows)
}

async fn terminal_snapshot(
    Path(name): Path<String>,
    State(state): State<BridgeState>,
) -> Response {
    match state.registry.capture(&name).await {
        Ok(bytes) => Json(SnapshotBody {
            content: String::from_utf8_lossy(&bytes).into_owned(),
        })
        .into_response(),
        Err(err) => error_response(&err),
    }
}

async fn terminal_input(
    Path(name): Path<String>,
    State(state): State<BridgeState>,
    Json(body): Json<InputBody>,
) -> Response {
    match state.registry.send_input(&name, body.data.as_bytes()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            debug!(session = %name, %err, "polled input rejected");
            error_response(&err)
        }
    }
}

async fn terminal_ws(
    ws: WebSocketUpgrade,
    Path(name): Path<String>,
    State(state): State<BridgeState>,
) -> Response {
    match state.registry.attach(&name).await {
        Ok(attachment) => {
            let registry = state.registry.clone();
            ws.on_upgrade(move |socket| stream_console(socket, name, registry, attachment))
        }
        Err(err) => error_response(&err),
    }
}

/// Pump one WebSocket against one console until either side goes away.
async fn stream_console(
    socket: WebSocket,
    name: String,
    registry: SessionRegistry,
    attachment: Attachment,
) {
    let span = info_span!("bridge_stream", session = %name);
    async move {
        let Attachment { stream, closed } = attachment;
        let mut output = stream.output;
        let input = stream.input;
        let (mut sender, mut receiver) = socket.split();
        info!("viewer attached");

        loop {
            tokio::select! {
                () = closed.cancelled() => {
                    debug!("session closed; ending stream");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                chunk = output.recv() => match chunk {
                    Ok(bytes) => {
                        if sender.send(Message::Binary(bytes)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "viewer fell behind console output");
                    }
                    Err(RecvError::Closed) => {
                        debug!("console output closed");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                },
                incoming = receiver.next() => match incoming {
                    Some(Ok(Message::Binary(data))) => {
                        if input.send(data).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if let Some(ControlFrame::Resize { rows, cols }) = ControlFrame::parse(text.as_str()) {
                            if let Err(err) = registry.resize(&name, TermSize { rows, cols }).await {
                                warn!(%err, "resize failed");
                            }
                        } else if input.send(Bytes::copy_from_slice(text.as_str().as_bytes())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(%err, "websocket read failed");
                        break;
                    }
                },
            }
        }
        info!("viewer detached");
    }
    .instrument(span)
    .await;
}
