//! Terminal bridge: remote access to a session's live console.
//!
//! The server side ([`server`]) exposes each console over a WebSocket
//! (persistent mode) and plain HTTP snapshot/input endpoints (polling
//! mode). The viewer side ([`viewer`]) drives one connection, starting in
//! persistent mode and falling back to polling when the stream cannot be
//! opened or drops.

pub mod protocol;
pub mod server;
pub mod transport;
pub mod viewer;

pub use protocol::{ConnectionMode, ControlFrame, InputBody, SnapshotBody};
pub use server::{router, serve};
pub use transport::{HttpPollTransport, LocalTransport, WsStreamTransport};
pub use viewer::{TerminalViewer, ViewerConnection, ViewerOptions, ViewerUpdate};
