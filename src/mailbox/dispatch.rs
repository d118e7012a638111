//! Translate claimed mailbox messages into registry requests and events.

use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::models::event::{EventKind, NotificationEvent};
use crate::models::message::MailboxMessage;
use crate::orchestrator::registry::SessionRegistry;
use crate::sinks::EventPublisher;

/// Deliver one claimed batch for `session`, in append order.
///
/// Each recognized message requests its target status from the registry
/// and publishes exactly one `status_change` event (old and new are equal
/// when the status did not move). A transition the lifecycle forbids still
/// publishes the message, with the status left as it was. Unrecognized
/// types are ignored. Rejections never stop the rest of the batch.
///
/// Returns the number of events published.
pub async fn deliver_batch(
    registry: &SessionRegistry,
    events: &EventPublisher,
    session: &str,
    messages: Vec<MailboxMessage>,
) -> usize {
    let mut published = 0;
    for message in messages {
        let Some(target) = message.kind.target_status() else {
            debug!(session, kind = message.kind.as_str(), "ignoring unrecognized mailbox type");
            continue;
        };

        match registry.set_status(session, target).await {
            Ok(change) => {
                info!(
                    session,
                    kind = message.kind.as_str(),
                    old = %change.old,
                    new = %change.new,
                    "mailbox message applied"
                );
                events
                    .publish(NotificationEvent::new(
                        session,
                        EventKind::StatusChange,
                        change.old,
                        change.new,
                        message.payload,
                    ))
                    .await;
                published += 1;
            }
            Err(AppError::InvalidTransition(detail)) => {
                let Some(current) = registry.get(session).await.map(|s| s.declared_status) else {
                    warn!(session, kind = message.kind.as_str(), "mailbox message for removed session");
                    continue;
                };
                warn!(
                    session,
                    kind = message.kind.as_str(),
                    %detail,
                    "mailbox transition rejected; surfacing message"
                );
                events
                    .publish(NotificationEvent::new(
                        session,
                        EventKind::StatusChange,
                        current,
                        current,
                        format!("{} (not applied: {current} cannot become {target})", message.payload),
                    ))
                    .await;
                published += 1;
            }
            Err(err) => {
                warn!(session, kind = message.kind.as_str(), %err, "mailbox message rejected");
            }
        }
    }
    published
}
