#![forbid(unsafe_code)]

//! Supervisor for long-running coding agents.
//!
//! Each worker runs as a named session inside an isolated workspace. The
//! crate tracks declared lifecycle status ([`orchestrator::registry`]),
//! receives worker notifications through a file mailbox ([`mailbox`]),
//! reconciles declared status against observed liveness
//! ([`orchestrator::reconciler`]) and exposes each worker console to remote
//! viewers ([`bridge`]).

pub mod bridge;
pub mod config;
pub mod errors;
pub mod host;
pub mod mailbox;
pub mod models;
pub mod orchestrator;
pub mod sinks;
pub mod workspace;

use std::future::Future;
use std::pin::Pin;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};

/// Boxed `Send` future used at the async trait seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
