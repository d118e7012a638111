//! Notification fan-out.
//!
//! Producers (mailbox watchers, the registry and the reconciler) hold an
//! [`EventPublisher`] and push [`NotificationEvent`]s into a bounded
//! channel. A single dispatcher task drains the channel and hands every
//! event to each registered [`NotificationSink`]. A failing sink is logged
//! and never prevents delivery to the others.

pub mod notice;
pub mod webhook;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::event::NotificationEvent;
use crate::{BoxFuture, Result};

pub use notice::NoticeSink;
pub use webhook::WebhookSink;

/// Destination for notification events.
pub trait NotificationSink: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Deliver one event.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Sink` if delivery fails. The dispatcher logs the
    /// failure and moves on.
    fn publish<'a>(&'a self, event: &'a NotificationEvent) -> BoxFuture<'a, Result<()>>;
}

/// Cloneable producer handle for notification events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<NotificationEvent>,
}

impl EventPublisher {
    /// Create a publisher and the receiving end consumed by the dispatcher.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<NotificationEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Publish an event. Events published after the dispatcher stopped are dropped.
    pub async fn publish(&self, event: NotificationEvent) {
        debug!(
            session = %event.session_name,
            kind = %event.kind,
            old = %event.old_status,
            new = %event.new_status,
            "publishing event"
        );
        if self.tx.send(event).await.is_err() {
            debug!("event channel closed; event dropped");
        }
    }
}

/// Spawn the task that fans events out to every sink.
///
/// Runs until the `CancellationToken` fires or every publisher is dropped.
#[must_use]
pub fn spawn_event_dispatcher(
    mut rx: mpsc::Receiver<NotificationEvent>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => {
                    info!("event dispatcher shutting down");
                    break;
                }
                maybe_event = rx.recv() => {
                    if let Some(e) = maybe_event { e } else {
                        info!("event channel closed");
                        break;
                    }
                }
            };

            for sink in &sinks {
                if let Err(err) = sink.publish(&event).await {
                    warn!(
                        %err,
                        sink = sink.name(),
                        session = %event.session_name,
                        "failed to deliver event to sink"
                    );
                }
            }
        }
    })
}
