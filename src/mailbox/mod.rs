//! Worker→orchestrator mailbox.
//!
//! Workers append `TYPE: text` lines to a file inside their workspace. The
//! orchestrator claims the file with an atomic rename, recreates it empty,
//! and only then reads the claimed contents, so a concurrent append lands
//! either in the claimed batch or in the fresh file and is never lost or
//! delivered twice.

pub mod claim;
pub mod dispatch;
pub mod watcher;

pub use claim::{claim, ensure_mailbox, parse_batch, recover_orphans};
pub use dispatch::deliver_batch;
pub use watcher::{MailboxWatcher, MailboxWatcherHandle};
