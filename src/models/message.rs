//! Mailbox message model and line parser.

use serde::{Deserialize, Serialize};

use super::session::SessionStatus;

/// Message type vocabulary understood by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Worker finished its task.
    Done,
    /// Worker asks the operator something.
    Question,
    /// Worker cannot proceed.
    Blocked,
    /// Worker hit an error.
    Error,
    /// Worker resumed work.
    Ready,
    /// Well-formed line with a type outside the vocabulary; tolerated.
    Other(String),
}

impl MessageKind {
    fn from_type(raw: &str) -> Self {
        match raw {
            "DONE" => Self::Done,
            "QUESTION" => Self::Question,
            "BLOCKED" => Self::Blocked,
            "ERROR" => Self::Error,
            "READY" => Self::Ready,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Status a message of this kind requests, if any.
    #[must_use]
    pub fn target_status(&self) -> Option<SessionStatus> {
        match self {
            Self::Done => Some(SessionStatus::Ready),
            Self::Ready => Some(SessionStatus::Active),
            Self::Question | Self::Blocked | Self::Error => Some(SessionStatus::NeedsAttention),
            Self::Other(_) => None,
        }
    }

    /// The `TYPE` token as written on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Done => "DONE",
            Self::Question => "QUESTION",
            Self::Blocked => "BLOCKED",
            Self::Error => "ERROR",
            Self::Ready => "READY",
            Self::Other(raw) => raw,
        }
    }
}

/// A single worker→orchestrator notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxMessage {
    /// Message type.
    pub kind: MessageKind,
    /// Free text after the `TYPE:` prefix, trimmed.
    pub payload: String,
}

impl MailboxMessage {
    /// Parse one `UPPERCASE_TYPE: free text` line.
    ///
    /// Returns `None` for blank or malformed lines; those are dropped
    /// silently by the claimer.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (raw_type, payload) = line.split_once(':')?;
        let raw_type = raw_type.trim();
        let well_formed = !raw_type.is_empty()
            && raw_type
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
            && raw_type.starts_with(|c: char| c.is_ascii_uppercase());
        if !well_formed {
            return None;
        }
        Some(Self {
            kind: MessageKind::from_type(raw_type),
            payload: payload.trim().to_owned(),
        })
    }

    /// Whether the message type is part of the known vocabulary.
    #[must_use]
    pub fn is_recognized(&self) -> bool {
        !matches!(self.kind, MessageKind::Other(_))
    }
}
