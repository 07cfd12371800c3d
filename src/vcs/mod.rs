//! Version-control capability.
//!
//! Every operation takes the repository or worktree path explicitly. The
//! production implementation is [`git::Git`].

pub mod git;

#[cfg(test)]
pub mod fake;

use std::path::Path;

use crate::store::CleanupStatus;

/// What a direct inspection of a worktree found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkStatus {
    pub uncommitted: bool,
    pub stash_count: usize,
    /// Commits on HEAD that no remote has.
    pub unpushed: usize,
}

impl WorkStatus {
    pub fn is_clean(&self) -> bool {
        !self.uncommitted && self.stash_count == 0 && self.unpushed == 0
    }

    /// The most severe finding, in the cleanup-status vocabulary agents report.
    pub fn cleanup_status(&self) -> CleanupStatus {
        if self.unpushed > 0 {
            CleanupStatus::HasUnpushed
        } else if self.stash_count > 0 {
            CleanupStatus::HasStash
        } else if self.uncommitted {
            CleanupStatus::HasUncommitted
        } else {
            CleanupStatus::Clean
        }
    }
}

pub trait Vcs {
    /// Bare clone with remote-tracking refs under `origin/*`.
    fn clone_bare(&self, url: &str, dest: &Path, reference: Option<&Path>) -> anyhow::Result<()>;
    fn clone_repo(&self, url: &str, dest: &Path, reference: Option<&Path>) -> anyhow::Result<()>;
    /// Default branch from the remote HEAD, falling back to local detection.
    fn default_branch(&self, repo: &Path) -> anyhow::Result<String>;
    fn fetch(&self, repo: &Path, remote: &str) -> anyhow::Result<()>;
    /// New worktree at `path` on a new `branch` created from `start_point`.
    fn worktree_add(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
        start_point: &str,
    ) -> anyhow::Result<()>;
    /// New worktree at `path` checking out an existing `branch`.
    fn worktree_add_existing(&self, repo: &Path, path: &Path, branch: &str) -> anyhow::Result<()>;
    fn worktree_remove(&self, repo: &Path, path: &Path, force: bool) -> anyhow::Result<()>;
    fn worktree_prune(&self, repo: &Path) -> anyhow::Result<()>;
    /// Local branches matching a glob such as `raider/*`.
    fn list_branches(&self, repo: &Path, pattern: &str) -> anyhow::Result<Vec<String>>;
    fn delete_branch(&self, repo: &Path, branch: &str, force: bool) -> anyhow::Result<()>;
    fn current_branch(&self, worktree: &Path) -> anyhow::Result<String>;
    fn status(&self, worktree: &Path) -> anyhow::Result<WorkStatus>;
    /// Commits on `upstream` that HEAD lacks.
    fn commits_behind(&self, worktree: &Path, upstream: &str) -> anyhow::Result<u32>;
    fn checkout_new_branch(&self, worktree: &Path, branch: &str) -> anyhow::Result<()>;
    fn pull_rebase(&self, worktree: &Path) -> anyhow::Result<()>;
    fn remote_url(&self, repo: &Path, remote: &str) -> anyhow::Result<Option<String>>;
}
