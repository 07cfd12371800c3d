//! Filesystem-backed fake for unit tests: clones and worktrees become plain
//! directories, branches live in a set.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{Vcs, WorkStatus};
use crate::error::HordeError;

#[derive(Debug, Default)]
struct State {
    default_branch: String,
    branches: BTreeSet<String>,
    worktrees: BTreeMap<PathBuf, String>,
    statuses: HashMap<PathBuf, WorkStatus>,
    behind: HashMap<PathBuf, u32>,
    clone_files: Vec<(String, String)>,
    fail: BTreeSet<&'static str>,
    calls: Vec<String>,
}

#[derive(Debug)]
pub struct FakeVcs {
    state: Mutex<State>,
}

impl Default for FakeVcs {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                default_branch: "main".to_string(),
                ..Default::default()
            }),
        }
    }
}

impl FakeVcs {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn set_default_branch(&self, branch: &str) {
        self.lock().default_branch = branch.to_string();
    }

    /// Files written into every regular clone, relative to its root.
    pub fn add_clone_file(&self, rel: &str, contents: &str) {
        self.lock().clone_files.push((rel.to_string(), contents.to_string()));
    }

    pub fn set_status(&self, worktree: &Path, status: WorkStatus) {
        self.lock().statuses.insert(worktree.to_path_buf(), status);
    }

    pub fn set_behind(&self, worktree: &Path, behind: u32) {
        self.lock().behind.insert(worktree.to_path_buf(), behind);
    }

    pub fn add_branch(&self, branch: &str) {
        self.lock().branches.insert(branch.to_string());
    }

    pub fn branches(&self) -> Vec<String> {
        self.lock().branches.iter().cloned().collect()
    }

    pub fn worktree_branch(&self, path: &Path) -> Option<String> {
        self.lock().worktrees.get(path).cloned()
    }

    /// Make the named operation fail from now on.
    pub fn fail_on(&self, op: &'static str) {
        self.lock().fail.insert(op);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn enter(&self, op: &'static str, detail: String) -> anyhow::Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push(format!("{op} {detail}"));
        if state.fail.contains(op) {
            return Err(HordeError::ToolFailed {
                tool: "git".into(),
                code: 128,
                message: format!("{op} failed"),
            }
            .into());
        }
        Ok(state)
    }
}

fn make_dir(path: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

impl Vcs for FakeVcs {
    fn clone_bare(&self, url: &str, dest: &Path, _reference: Option<&Path>) -> anyhow::Result<()> {
        let state = self.enter("clone_bare", url.to_string())?;
        make_dir(dest)?;
        fs::write(dest.join("HEAD"), format!("ref: refs/heads/{}\n", state.default_branch))?;
        Ok(())
    }

    fn clone_repo(&self, url: &str, dest: &Path, _reference: Option<&Path>) -> anyhow::Result<()> {
        let state = self.enter("clone_repo", url.to_string())?;
        make_dir(&dest.join(".git"))?;
        for (rel, contents) in &state.clone_files {
            let path = dest.join(rel);
            if let Some(parent) = path.parent() {
                make_dir(parent)?;
            }
            fs::write(path, contents)?;
        }
        Ok(())
    }

    fn default_branch(&self, _repo: &Path) -> anyhow::Result<String> {
        let state = self.enter("default_branch", String::new())?;
        Ok(state.default_branch.clone())
    }

    fn fetch(&self, _repo: &Path, remote: &str) -> anyhow::Result<()> {
        self.enter("fetch", remote.to_string()).map(|_| ())
    }

    fn worktree_add(
        &self,
        _repo: &Path,
        path: &Path,
        branch: &str,
        start_point: &str,
    ) -> anyhow::Result<()> {
        let mut state = self.enter("worktree_add", format!("{branch} {start_point}"))?;
        if !state.branches.insert(branch.to_string()) {
            return Err(HordeError::Exists(format!("branch {branch}")).into());
        }
        make_dir(path)?;
        fs::write(path.join(".git"), "gitdir: fake\n")?;
        state.worktrees.insert(path.to_path_buf(), branch.to_string());
        Ok(())
    }

    fn worktree_add_existing(&self, _repo: &Path, path: &Path, branch: &str) -> anyhow::Result<()> {
        let mut state = self.enter("worktree_add_existing", branch.to_string())?;
        make_dir(path)?;
        fs::write(path.join(".git"), "gitdir: fake\n")?;
        state.worktrees.insert(path.to_path_buf(), branch.to_string());
        Ok(())
    }

    fn worktree_remove(&self, _repo: &Path, path: &Path, _force: bool) -> anyhow::Result<()> {
        let mut state = self.enter("worktree_remove", path.display().to_string())?;
        state.worktrees.remove(path);
        if path.exists() {
            fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    fn worktree_prune(&self, _repo: &Path) -> anyhow::Result<()> {
        self.enter("worktree_prune", String::new()).map(|_| ())
    }

    fn list_branches(&self, _repo: &Path, pattern: &str) -> anyhow::Result<Vec<String>> {
        let state = self.enter("list_branches", pattern.to_string())?;
        let prefix = pattern.trim_end_matches('*');
        Ok(state
            .branches
            .iter()
            .filter(|b| b.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn delete_branch(&self, _repo: &Path, branch: &str, _force: bool) -> anyhow::Result<()> {
        let mut state = self.enter("delete_branch", branch.to_string())?;
        state.branches.remove(branch);
        Ok(())
    }

    fn current_branch(&self, worktree: &Path) -> anyhow::Result<String> {
        let state = self.enter("current_branch", String::new())?;
        Ok(state
            .worktrees
            .get(worktree)
            .cloned()
            .unwrap_or_else(|| state.default_branch.clone()))
    }

    fn status(&self, worktree: &Path) -> anyhow::Result<WorkStatus> {
        let state = self.enter("status", worktree.display().to_string())?;
        Ok(state.statuses.get(worktree).copied().unwrap_or_default())
    }

    fn commits_behind(&self, worktree: &Path, _upstream: &str) -> anyhow::Result<u32> {
        let state = self.enter("commits_behind", String::new())?;
        Ok(state.behind.get(worktree).copied().unwrap_or(0))
    }

    fn checkout_new_branch(&self, worktree: &Path, branch: &str) -> anyhow::Result<()> {
        let mut state = self.enter("checkout_new_branch", branch.to_string())?;
        state.branches.insert(branch.to_string());
        state.worktrees.insert(worktree.to_path_buf(), branch.to_string());
        Ok(())
    }

    fn pull_rebase(&self, _worktree: &Path) -> anyhow::Result<()> {
        self.enter("pull_rebase", String::new()).map(|_| ())
    }

    fn remote_url(&self, _repo: &Path, _remote: &str) -> anyhow::Result<Option<String>> {
        self.enter("remote_url", String::new()).map(|_| None)
    }
}
