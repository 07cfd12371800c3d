//! `git` CLI implementation of [`Vcs`].

use std::path::Path;
use std::time::Duration;

use super::{Vcs, WorkStatus};
use crate::subprocess::{RunOutput, Tool};

const GIT: &str = "git";
const NETWORK_TIMEOUT: Duration = Duration::from_secs(600);
const LOCAL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default)]
pub struct Git;

fn git_in(dir: &Path) -> Tool {
    Tool::new(GIT)
        .arg("-C")
        .arg(&dir.to_string_lossy())
        .timeout(LOCAL_TIMEOUT)
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `origin/main` → `main`; `refs/heads/main` → `main`.
fn short_branch(reference: &str) -> Option<String> {
    let reference = reference.trim();
    let name = reference
        .strip_prefix("refs/remotes/origin/")
        .or_else(|| reference.strip_prefix("refs/heads/"))
        .or_else(|| reference.strip_prefix("origin/"))
        .unwrap_or(reference);
    (!name.is_empty() && name != "HEAD").then(|| name.to_string())
}

/// Parse `git ls-remote --symref origin HEAD` output.
fn parse_symref(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let rest = line.strip_prefix("ref:")?;
        let (reference, head) = rest.trim().split_once(char::is_whitespace)?;
        (head.trim() == "HEAD").then(|| short_branch(reference)).flatten()
    })
}

fn count_lines(output: &RunOutput) -> usize {
    output.stdout.lines().filter(|l| !l.trim().is_empty()).count()
}

fn parse_count(output: &RunOutput) -> u32 {
    output.stdout.trim().parse().unwrap_or(0)
}

fn clone_args<'a>(bare: bool, reference: Option<&'a str>, url: &'a str, dest: &'a str) -> Vec<&'a str> {
    let mut args = vec!["clone"];
    if bare {
        args.push("--bare");
    }
    if let Some(reference) = reference {
        args.extend(["--reference-if-able", reference, "--dissociate"]);
    }
    args.extend(["--", url, dest]);
    args
}

impl Vcs for Git {
    fn clone_bare(&self, url: &str, dest: &Path, reference: Option<&Path>) -> anyhow::Result<()> {
        let dest_s = path_str(dest);
        let reference = reference.map(path_str);
        Tool::new(GIT)
            .args(&clone_args(true, reference.as_deref(), url, &dest_s))
            .timeout(NETWORK_TIMEOUT)
            .run_ok()?;
        // A bare clone maps branches straight onto refs/heads; worktrees start
        // from origin/<branch>, so track the remote like a regular clone does.
        git_in(dest)
            .args(&["config", "remote.origin.fetch", "+refs/heads/*:refs/remotes/origin/*"])
            .run_ok()?;
        self.fetch(dest, "origin")
    }

    fn clone_repo(&self, url: &str, dest: &Path, reference: Option<&Path>) -> anyhow::Result<()> {
        let dest_s = path_str(dest);
        let reference = reference.map(path_str);
        Tool::new(GIT)
            .args(&clone_args(false, reference.as_deref(), url, &dest_s))
            .timeout(NETWORK_TIMEOUT)
            .run_ok()?;
        Ok(())
    }

    fn default_branch(&self, repo: &Path) -> anyhow::Result<String> {
        let remote_head = git_in(repo)
            .args(&["ls-remote", "--symref", "origin", "HEAD"])
            .timeout(NETWORK_TIMEOUT)
            .run();
        if let Ok(ref output) = remote_head
            && output.success()
            && let Some(branch) = parse_symref(&output.stdout)
        {
            return Ok(branch);
        }

        for probe in [
            &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"][..],
            &["symbolic-ref", "HEAD"][..],
        ] {
            let output = git_in(repo).args(probe).run()?;
            if output.success()
                && let Some(branch) = short_branch(&output.stdout)
            {
                return Ok(branch);
            }
        }
        tracing::debug!(repo = %repo.display(), "default branch undetectable, assuming main");
        Ok(crate::config::DEFAULT_BRANCH.to_string())
    }

    fn fetch(&self, repo: &Path, remote: &str) -> anyhow::Result<()> {
        git_in(repo)
            .args(&["fetch", "--prune", remote])
            .timeout(NETWORK_TIMEOUT)
            .run_ok()?;
        Ok(())
    }

    fn worktree_add(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
        start_point: &str,
    ) -> anyhow::Result<()> {
        let path = path_str(path);
        git_in(repo)
            .args(&["worktree", "add", "-b", branch, &path, start_point])
            .run_ok()?;
        Ok(())
    }

    fn worktree_add_existing(&self, repo: &Path, path: &Path, branch: &str) -> anyhow::Result<()> {
        let path = path_str(path);
        git_in(repo)
            .args(&["worktree", "add", &path, branch])
            .run_ok()?;
        Ok(())
    }

    fn worktree_remove(&self, repo: &Path, path: &Path, force: bool) -> anyhow::Result<()> {
        let path = path_str(path);
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&path);
        git_in(repo).args(&args).run_ok()?;
        Ok(())
    }

    fn worktree_prune(&self, repo: &Path) -> anyhow::Result<()> {
        git_in(repo).args(&["worktree", "prune"]).run_ok()?;
        Ok(())
    }

    fn list_branches(&self, repo: &Path, pattern: &str) -> anyhow::Result<Vec<String>> {
        let output = git_in(repo)
            .args(&["branch", "--list", pattern, "--format=%(refname:short)"])
            .run_ok()?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn delete_branch(&self, repo: &Path, branch: &str, force: bool) -> anyhow::Result<()> {
        let flag = if force { "-D" } else { "-d" };
        git_in(repo).args(&["branch", flag, branch]).run_ok()?;
        Ok(())
    }

    fn current_branch(&self, worktree: &Path) -> anyhow::Result<String> {
        let output = git_in(worktree)
            .args(&["rev-parse", "--abbrev-ref", "HEAD"])
            .run_ok()?;
        Ok(output.stdout.trim().to_string())
    }

    fn status(&self, worktree: &Path) -> anyhow::Result<WorkStatus> {
        let porcelain = git_in(worktree).args(&["status", "--porcelain"]).run_ok()?;
        let stashes = git_in(worktree).args(&["stash", "list"]).run_ok()?;
        let unpushed = git_in(worktree)
            .args(&["rev-list", "--count", "HEAD", "--not", "--remotes"])
            .run_ok()?;
        Ok(WorkStatus {
            uncommitted: count_lines(&porcelain) > 0,
            stash_count: count_lines(&stashes),
            unpushed: parse_count(&unpushed) as usize,
        })
    }

    fn commits_behind(&self, worktree: &Path, upstream: &str) -> anyhow::Result<u32> {
        let range = format!("HEAD..{upstream}");
        let output = git_in(worktree)
            .args(&["rev-list", "--count", &range])
            .run_ok()?;
        Ok(parse_count(&output))
    }

    fn checkout_new_branch(&self, worktree: &Path, branch: &str) -> anyhow::Result<()> {
        git_in(worktree).args(&["checkout", "-b", branch]).run_ok()?;
        Ok(())
    }

    fn pull_rebase(&self, worktree: &Path) -> anyhow::Result<()> {
        git_in(worktree)
            .args(&["pull", "--rebase"])
            .timeout(NETWORK_TIMEOUT)
            .run_ok()?;
        Ok(())
    }

    fn remote_url(&self, repo: &Path, remote: &str) -> anyhow::Result<Option<String>> {
        let output = git_in(repo).args(&["remote", "get-url", remote]).run()?;
        if !output.success() {
            return Ok(None);
        }
        let url = output.stdout.trim();
        Ok((!url.is_empty()).then(|| url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symref_output_is_parsed() {
        let out = "ref: refs/heads/trunk\tHEAD\n0123abcd\tHEAD\n";
        assert_eq!(parse_symref(out).as_deref(), Some("trunk"));
        assert_eq!(parse_symref("0123abcd\tHEAD\n"), None);
    }

    #[test]
    fn short_branch_strips_known_prefixes() {
        assert_eq!(short_branch("origin/main\n").as_deref(), Some("main"));
        assert_eq!(short_branch("refs/heads/develop").as_deref(), Some("develop"));
        assert_eq!(short_branch("refs/remotes/origin/main").as_deref(), Some("main"));
        assert_eq!(short_branch("HEAD"), None);
    }

    #[test]
    fn clone_args_use_reference_when_given() {
        assert_eq!(
            clone_args(true, Some("/src/horde"), "git@host:o/horde.git", "/e/horde/.repo.git"),
            vec![
                "clone",
                "--bare",
                "--reference-if-able",
                "/src/horde",
                "--dissociate",
                "--",
                "git@host:o/horde.git",
                "/e/horde/.repo.git"
            ]
        );
        assert_eq!(
            clone_args(false, None, "u", "d"),
            vec!["clone", "--", "u", "d"]
        );
    }
}
