//! Remote push sink: POSTs each event as a flat JSON record.

use tracing::debug;

use super::NotificationSink;
use crate::models::event::NotificationEvent;
use crate::{AppError, BoxFuture, Result};

/// Sink delivering events to an HTTP endpoint.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    /// Create a sink posting to `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    fn publish<'a>(&'a self, event: &'a NotificationEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.url)
                .json(event)
                .send()
                .await
                .map_err(|err| AppError::Sink(format!("webhook request failed: {err}")))?;
            response
                .error_for_status()
                .map_err(|err| AppError::Sink(format!("webhook rejected event: {err}")))?;
            debug!(session = %event.session_name, kind = %event.kind, "event pushed to webhook");
            Ok(())
        })
    }
}
