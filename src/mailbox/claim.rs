//! Rename-and-recreate claim of a mailbox file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::{self, OpenOptions};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::models::message::MailboxMessage;
use crate::{AppError, Result};

/// Infix marking claimed-but-unprocessed mailbox files.
const CLAIM_MARKER: &str = ".claimed.";

/// Pause before re-checking a claimed file for late appends.
const CLAIM_SETTLE: Duration = Duration::from_millis(5);
const CLAIM_SETTLE_ROUNDS: usize = 3;

/// Create the mailbox (and its parent directory) if missing.
///
/// Never truncates: a worker may already have appended to it.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory or file cannot be created.
pub async fn ensure_mailbox(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(())
}

/// Claim every complete message currently in the mailbox at `path`.
///
/// An empty or absent mailbox yields an empty batch without touching the
/// file, so the claim's own recreate does not trigger another claim.
///
/// # Errors
///
/// Returns `AppError::Io` if the file exists but cannot be renamed or read.
/// A mailbox that disappears between the check and the rename is a no-op.
pub async fn claim(path: &Path) -> Result<Vec<MailboxMessage>> {
    let span = info_span!("mailbox_claim", path = %path.display());
    async move {
        match fs::metadata(path).await {
            Ok(meta) if meta.len() == 0 => return Ok(Vec::new()),
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(AppError::Io(format!("failed to stat mailbox: {err}"))),
        }

        let claimed = claimed_path(path);
        match fs::rename(path, &claimed).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("mailbox vanished before claim; next write recreates it");
                return Ok(Vec::new());
            }
            Err(err) => return Err(AppError::Io(format!("failed to claim mailbox: {err}"))),
        }

        // Recreate before reading so later appends always have a target.
        if let Err(err) = ensure_mailbox(path).await {
            warn!(%err, "failed to recreate mailbox after claim");
        }

        consume_claimed(&claimed).await
    }
    .instrument(span)
    .await
}

/// Deliver claimed files left behind by an interrupted earlier claimer.
///
/// Files are processed oldest first.
///
/// # Errors
///
/// Returns `AppError::Io` if the mailbox directory cannot be listed.
pub async fn recover_orphans(path: &Path) -> Result<Vec<MailboxMessage>> {
    let (Some(dir), Some(file_name)) = (path.parent(), path.file_name()) else {
        return Ok(Vec::new());
    };
    let prefix = format!(".{}{CLAIM_MARKER}", file_name.to_string_lossy());

    let mut orphans = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            let modified = entry.metadata().await.and_then(|m| m.modified()).ok();
            orphans.push((modified, entry.path()));
        }
    }
    orphans.sort();

    let mut messages = Vec::new();
    for (_, orphan) in orphans {
        warn!(file = %orphan.display(), "recovering orphaned mailbox claim");
        messages.extend(consume_claimed(&orphan).await?);
    }
    Ok(messages)
}

async fn consume_claimed(claimed: &Path) -> Result<Vec<MailboxMessage>> {
    let mut raw = read_claimed(claimed).await?;

    // A writer that opened the mailbox just before the rename appends to
    // the claimed file; pick those lines up before discarding it.
    for _ in 0..CLAIM_SETTLE_ROUNDS {
        tokio::time::sleep(CLAIM_SETTLE).await;
        let len = fs::metadata(claimed)
            .await
            .map(|meta| meta.len())
            .unwrap_or_default();
        if usize::try_from(len).unwrap_or(usize::MAX) <= raw.len() {
            break;
        }
        raw = read_claimed(claimed).await?;
    }

    if let Err(err) = fs::remove_file(claimed).await {
        warn!(%err, file = %claimed.display(), "failed to discard claimed mailbox");
    }
    Ok(parse_batch(&String::from_utf8_lossy(&raw)))
}

async fn read_claimed(claimed: &Path) -> Result<Vec<u8>> {
    fs::read(claimed)
        .await
        .map_err(|err| AppError::Io(format!("failed to read claimed mailbox: {err}")))
}

fn claimed_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{file_name}{CLAIM_MARKER}{}", Uuid::new_v4()))
}

/// Parse a claimed batch in append order, dropping malformed lines.
#[must_use]
pub fn parse_batch(text: &str) -> Vec<MailboxMessage> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let parsed = MailboxMessage::parse_line(line);
            if parsed.is_none() {
                debug!(line, "dropping malformed mailbox line");
            }
            parsed
        })
        .collect()
}
