//! Session orchestration.
//!
//! The [`registry`] owns every session record and its lifecycle; the
//! [`reconciler`] periodically checks declared status against what the
//! process host observes.

pub mod reconciler;
pub mod registry;

pub use reconciler::{Reconciler, ReconcilerOptions};
pub use registry::{RegistryOptions, SessionRegistry};
