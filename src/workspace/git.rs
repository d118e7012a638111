//! `git worktree` backed provisioner.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, info_span, Instrument};

use super::WorkspaceProvisioner;
use crate::{AppError, BoxFuture, Result};

/// Provisions one worktree per session under `worktrees_dir`.
#[derive(Debug, Clone)]
pub struct GitWorktreeProvisioner {
    repo_root: PathBuf,
    worktrees_dir: PathBuf,
}

struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl GitWorktreeProvisioner {
    /// Create a provisioner for the repository at `repo_root`.
    #[must_use]
    pub fn new(repo_root: impl Into<PathBuf>, worktrees_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            worktrees_dir: worktrees_dir.into(),
        }
    }

    async fn git(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput> {
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| AppError::Workspace(format!("failed to run git: {err}")))?;
        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

/// Whether `git worktree remove` refused because of local modifications.
fn is_dirty_refusal(stderr: &str) -> bool {
    stderr.contains("contains modified or untracked files") || stderr.contains("use --force")
}

impl WorkspaceProvisioner for GitWorktreeProvisioner {
    fn create_workspace<'a>(
        &'a self,
        name: &'a str,
        base_ref: &'a str,
    ) -> BoxFuture<'a, Result<PathBuf>> {
        let span = info_span!("create_workspace", name, base_ref);
        Box::pin(
            async move {
                tokio::fs::create_dir_all(&self.worktrees_dir)
                    .await
                    .map_err(|err| {
                        AppError::Workspace(format!("failed to create worktrees dir: {err}"))
                    })?;
                let path = self.worktrees_dir.join(name);
                let path_arg = path.to_string_lossy().into_owned();
                let out = self
                    .git(
                        &self.repo_root,
                        &["worktree", "add", &path_arg, "-b", name, base_ref],
                    )
                    .await?;
                if !out.success {
                    return Err(AppError::Workspace(format!(
                        "git worktree add failed: {}",
                        out.stderr
                    )));
                }
                info!(path = %path.display(), "workspace created");
                Ok(path)
            }
            .instrument(span),
        )
    }

    fn remove_workspace<'a>(&'a self, path: &'a Path, force: bool) -> BoxFuture<'a, Result<()>> {
        let span = info_span!("remove_workspace", path = %path.display(), force);
        Box::pin(
            async move {
                let path_arg = path.to_string_lossy().into_owned();
                let mut args = vec!["worktree", "remove"];
                if force {
                    args.push("--force");
                }
                args.push(&path_arg);
                let out = self.git(&self.repo_root, &args).await?;
                if out.success {
                    info!("workspace removed");
                    return Ok(());
                }
                if !force && is_dirty_refusal(&out.stderr) {
                    return Err(AppError::DirtyWorkspace(path.display().to_string()));
                }
                Err(AppError::Workspace(format!(
                    "git worktree remove failed: {}",
                    out.stderr
                )))
            }
            .instrument(span),
        )
    }

    fn workspace_is_dirty<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let out = self.git(path, &["status", "--porcelain"]).await?;
            if !out.success {
                return Err(AppError::Workspace(format!(
                    "git status failed in {}: {}",
                    path.display(),
                    out.stderr
                )));
            }
            Ok(!out.stdout.trim().is_empty())
        })
    }
}
