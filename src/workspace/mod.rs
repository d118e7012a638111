//! Workspace provisioner abstraction.
//!
//! The supervisor never performs version-control operations itself; it
//! delegates to a [`WorkspaceProvisioner`]. [`git::GitWorktreeProvisioner`]
//! backs each session with a `git worktree`.

pub mod git;

use std::path::{Path, PathBuf};

use crate::{BoxFuture, Result};

pub use git::GitWorktreeProvisioner;

/// Collaborator that creates and removes isolated workspaces.
pub trait WorkspaceProvisioner: Send + Sync {
    /// Create a workspace for `name` branched from `base_ref`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Workspace` if the workspace cannot be created.
    fn create_workspace<'a>(&'a self, name: &'a str, base_ref: &'a str)
        -> BoxFuture<'a, Result<PathBuf>>;

    /// Remove a workspace. Without `force`, a dirty workspace is refused.
    ///
    /// # Errors
    ///
    /// Returns `AppError::DirtyWorkspace` when the tree has uncommitted
    /// changes and `force` is false, `AppError::Workspace` otherwise.
    fn remove_workspace<'a>(&'a self, path: &'a Path, force: bool) -> BoxFuture<'a, Result<()>>;

    /// Whether the workspace has uncommitted changes.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Workspace` if the state cannot be determined.
    fn workspace_is_dirty<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<bool>>;
}
