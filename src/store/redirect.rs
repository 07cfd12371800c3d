//! `.store/redirect` files: how a worktree finds the store it shares.
//!
//! A redirect is one line holding a path relative to the directory that owns
//! the `.store` (not relative to `.store` itself).

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;

use super::STORE_DIR_NAME;
use crate::error::HordeError;
use crate::fsutil::normalize;

pub const REDIRECT_FILE: &str = "redirect";
/// Hops followed before giving up on a chain.
pub const MAX_REDIRECT_HOPS: usize = 3;

/// Runtime artifacts of the store CLI that are gitignored and must not survive
/// in a redirected `.store/`.
const RUNTIME_EXACT: &[&str] = &[
    "issues.jsonl",
    "daemon.pid",
    "daemon.lock",
    "bd.sock",
    "last-touched",
    "sync_base.jsonl",
];
const RUNTIME_SUFFIXES: &[&str] = &[".db", ".db-wal", ".db-shm", ".db-journal", ".lock", ".log"];
const RUNTIME_PREFIXES: &[&str] = &[".sync-", "sync-"];

/// Read a redirect target; `None` when absent or blank.
pub fn read_redirect(store_dir: &Path) -> Option<String> {
    let contents = fs::read_to_string(store_dir.join(REDIRECT_FILE)).ok()?;
    let target = contents.lines().next().unwrap_or("").trim().to_string();
    (!target.is_empty()).then_some(target)
}

/// Resolve the effective store directory for `worktree`.
///
/// Follows up to [`MAX_REDIRECT_HOPS`] redirects. A redirect that leads back to
/// the starting store (or to any store already visited) is removed and the local
/// `.store` is returned.
pub fn resolve_store_dir(worktree: &Path) -> PathBuf {
    let origin = normalize(&worktree.join(STORE_DIR_NAME));
    let mut visited: HashSet<PathBuf> = HashSet::from([origin.clone()]);
    let mut current = origin.clone();

    for _ in 0..MAX_REDIRECT_HOPS {
        let Some(target) = read_redirect(&current) else {
            return current;
        };
        let owner = current.parent().unwrap_or(&current).to_path_buf();
        let resolved = normalize(&owner.join(&target));

        if visited.contains(&resolved) {
            let offender = current.join(REDIRECT_FILE);
            tracing::warn!(
                redirect = %offender.display(),
                target = %target,
                "circular store redirect, removing it"
            );
            if let Err(e) = fs::remove_file(&offender) {
                tracing::warn!(path = %offender.display(), error = %e, "could not remove circular redirect");
            }
            return origin;
        }
        visited.insert(resolved.clone());
        current = resolved;
    }

    if read_redirect(&current).is_some() {
        tracing::warn!(
            path = %current.display(),
            hops = MAX_REDIRECT_HOPS,
            "store redirect chain too deep, stopping"
        );
    }
    current
}

/// Write `<worktree>/.store/redirect` pointing straight at the warband's final
/// store, collapsing any warband-level chain.
///
/// Gitignored runtime files in the worktree's `.store/` are removed; tracked
/// files (configs, README, rituals) are kept. The canonical store location
/// `<warband>/warchief/project` is refused.
pub fn setup_redirect(encampment_root: &Path, worktree: &Path) -> anyhow::Result<PathBuf> {
    let rel = worktree
        .strip_prefix(encampment_root)
        .map_err(|_| {
            HordeError::Validation(format!(
                "{} is not inside encampment {}",
                worktree.display(),
                encampment_root.display()
            ))
        })?
        .to_path_buf();
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if parts.len() < 2 {
        return Err(HordeError::Validation(format!(
            "{} is not a warband worktree",
            worktree.display()
        ))
        .into());
    }
    if parts.len() == 3 && parts[1] == "warchief" && parts[2] == "project" {
        return Err(HordeError::Validation(format!(
            "refusing to redirect the canonical store location {}",
            worktree.display()
        ))
        .into());
    }

    let warband_root = encampment_root.join(&parts[0]);
    let warband_store = warband_root.join(STORE_DIR_NAME);
    let warchief_store = warband_root.join("warchief/project").join(STORE_DIR_NAME);

    let up = "../".repeat(parts.len() - 1);
    let target = if warband_store.exists() {
        match read_redirect(&warband_store) {
            Some(chained) => format!("{up}{chained}"),
            None => format!("{up}{STORE_DIR_NAME}"),
        }
    } else if warchief_store.exists() {
        format!("{up}warchief/project/{STORE_DIR_NAME}")
    } else {
        return Err(HordeError::NotFound(format!(
            "store at {} or {}",
            warband_store.display(),
            warchief_store.display()
        ))
        .into());
    };

    let local_store = worktree.join(STORE_DIR_NAME);
    clean_runtime_files(&local_store)?;
    fs::create_dir_all(&local_store)
        .with_context(|| format!("creating {}", local_store.display()))?;
    let redirect_path = local_store.join(REDIRECT_FILE);
    fs::write(&redirect_path, format!("{target}\n"))
        .with_context(|| format!("writing {}", redirect_path.display()))?;

    tracing::debug!(worktree = %worktree.display(), target = %target, "store redirect written");
    Ok(redirect_path)
}

/// Write a redirect file directly.
pub fn write_redirect(store_dir: &Path, target: &str) -> anyhow::Result<()> {
    fs::create_dir_all(store_dir).with_context(|| format!("creating {}", store_dir.display()))?;
    let path = store_dir.join(REDIRECT_FILE);
    fs::write(&path, format!("{target}\n")).with_context(|| format!("writing {}", path.display()))
}

fn is_runtime_file(name: &str) -> bool {
    RUNTIME_EXACT.contains(&name)
        || RUNTIME_SUFFIXES.iter().any(|s| name.ends_with(s))
        || RUNTIME_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Remove runtime artifacts from a `.store/` directory. Returns how many were removed.
pub fn clean_runtime_files(store_dir: &Path) -> anyhow::Result<usize> {
    if !store_dir.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(store_dir).with_context(|| format!("reading {}", store_dir.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_runtime_file(&name) {
            fs::remove_file(entry.path())
                .with_context(|| format!("removing {}", entry.path().display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}
