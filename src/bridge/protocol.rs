//! Wire types shared by the bridge server and viewers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::host::TermSize;
use crate::models::session::SessionStatus;

/// Out-of-band control frame sent as WebSocket text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Viewer geometry changed.
    Resize {
        /// Row count.
        rows: u16,
        /// Column count.
        cols: u16,
    },
}

impl ControlFrame {
    /// Parse a text frame; `None` means the text is raw input.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Resize frame for `size`.
    #[must_use]
    pub fn resize(size: TermSize) -> Self {
        Self::Resize {
            rows: size.rows,
            cols: size.cols,
        }
    }

    /// JSON encoding of the frame.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; a resize frame always encodes.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Full visible-buffer snapshot returned in polling mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotBody {
    /// Screen contents including escape sequences.
    pub content: String,
}

/// Batched input submitted in polling mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBody {
    /// Raw input text, control sequences included.
    pub data: String,
}

/// Transport mode of one viewer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Persistent duplex stream.
    Streaming,
    /// Snapshot polling with batched input.
    Polling,
}

/// Frame a viewer sends over a persistent stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Raw input bytes.
    Input(Bytes),
    /// Geometry change.
    Resize(TermSize),
}

/// One row of `GET /sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session name.
    pub name: String,
    /// Declared status.
    pub status: SessionStatus,
    /// Workspace path.
    pub workspace_path: String,
    /// Observed liveness at request time.
    pub alive: bool,
}
