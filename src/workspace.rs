//! Finding the encampment root from any path inside it.

use std::path::{Component, Path, PathBuf};

use crate::error::HordeError;

/// Primary marker, relative to the encampment root.
pub const PRIMARY_MARKER: &str = "warchief/encampment.json";
/// Secondary marker: a bare `warchief/` directory.
pub const SECONDARY_MARKER: &str = "warchief";
pub const ROOT_ENV: &str = "ENCAMPMENT_ROOT";

/// Walk up from `start` looking for an encampment root.
///
/// Inside a raider or clan worktree the walk continues to the outermost primary
/// marker so that a nested encampment accidentally created inside a checkout is
/// ignored. Symlinks are not resolved.
pub fn find(start: &Path) -> anyhow::Result<PathBuf> {
    let start = absolute(start);
    let in_worktree = is_worktree_path(&start);

    let mut primary: Option<PathBuf> = None;
    let mut secondary: Option<PathBuf> = None;

    for dir in start.ancestors() {
        if dir.join(PRIMARY_MARKER).is_file() {
            if !in_worktree {
                return Ok(dir.to_path_buf());
            }
            primary = Some(dir.to_path_buf());
        }
        if secondary.is_none() && dir.join(SECONDARY_MARKER).is_dir() {
            secondary = Some(dir.to_path_buf());
        }
    }

    primary
        .or(secondary)
        .ok_or_else(|| HordeError::NoWorkspace(start.display().to_string()).into())
}

/// Resolve from the current directory, falling back to `ENCAMPMENT_ROOT` only when
/// the current directory no longer exists.
pub fn find_from_cwd() -> anyhow::Result<PathBuf> {
    match std::env::current_dir() {
        Ok(cwd) => find(&cwd),
        Err(e) => {
            tracing::debug!(error = %e, "current directory unavailable, trying {ROOT_ENV}");
            let root = std::env::var_os(ROOT_ENV)
                .map(PathBuf::from)
                .ok_or_else(|| HordeError::NoWorkspace(format!("<deleted cwd> ({e})")))?;
            if root.join(PRIMARY_MARKER).is_file() || root.join(SECONDARY_MARKER).is_dir() {
                Ok(root)
            } else {
                Err(HordeError::NoWorkspace(root.display().to_string()).into())
            }
        }
    }
}

/// True when the path lies under a `raiders/` or `clan/` directory.
pub fn is_worktree_path(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(name) => name == "raiders" || name == "clan",
        _ => false,
    })
}

/// Where a path sits inside the encampment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub warband: Option<String>,
    pub role: String,
    pub name: Option<String>,
}

/// Classify `path` relative to `root`: which warband and role own it.
pub fn locate(root: &Path, path: &Path) -> Option<Location> {
    let rel = absolute(path).strip_prefix(absolute(root)).ok()?.to_path_buf();
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    let first = parts.first()?;
    if first == "warchief" || first == "shaman" {
        return Some(Location {
            warband: None,
            role: first.clone(),
            name: None,
        });
    }
    let warband = Some(first.clone());
    match parts.get(1).map(String::as_str) {
        Some("raiders") => Some(Location {
            warband,
            role: "raider".into(),
            name: parts.get(2).cloned(),
        }),
        Some("clan") => Some(Location {
            warband,
            role: "clan".into(),
            name: parts.get(2).cloned(),
        }),
        Some(role @ ("witness" | "forge" | "warchief")) => Some(Location {
            warband,
            role: role.to_string(),
            name: None,
        }),
        _ => None,
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_encampment(root: &Path) {
        fs::create_dir_all(root.join("warchief")).unwrap();
        fs::write(root.join(PRIMARY_MARKER), "{}").unwrap();
    }

    #[test]
    fn finds_root_from_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        make_encampment(dir.path());
        let deep = dir.path().join("horde/warchief/project/src");
        fs::create_dir_all(&deep).unwrap();
        // horde/warchief exists but has no encampment.json; the primary marker wins.
        assert_eq!(find(&deep).unwrap(), dir.path());
    }

    #[test]
    fn worktree_skips_nested_encampment() {
        let dir = tempfile::tempdir().unwrap();
        make_encampment(dir.path());
        let worktree = dir.path().join("horde/raiders/toast/horde");
        make_encampment(&worktree);
        let inner = worktree.join("src");
        fs::create_dir_all(&inner).unwrap();
        assert_eq!(find(&inner).unwrap(), dir.path());
    }

    #[test]
    fn secondary_marker_used_when_no_primary() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("warchief")).unwrap();
        let sub = dir.path().join("a/b");
        fs::create_dir_all(&sub).unwrap();
        assert_eq!(find(&sub).unwrap(), dir.path());
    }

    #[test]
    fn no_markers_is_no_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let err = find(dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HordeError>(),
            Some(HordeError::NoWorkspace(_))
        ));
    }

    #[test]
    fn worktree_path_detection() {
        assert!(is_worktree_path(Path::new("/e/horde/raiders/toast/horde")));
        assert!(is_worktree_path(Path::new("/e/horde/clan/max")));
        assert!(!is_worktree_path(Path::new("/e/horde/forge/project")));
        assert!(!is_worktree_path(Path::new("/e/raiders-old/x")));
    }

    #[test]
    fn locate_classifies_paths() {
        let root = Path::new("/e");
        assert_eq!(
            locate(root, Path::new("/e/horde/raiders/toast/horde/src")),
            Some(Location {
                warband: Some("horde".into()),
                role: "raider".into(),
                name: Some("toast".into()),
            })
        );
        assert_eq!(
            locate(root, Path::new("/e/horde/witness")).map(|l| l.role),
            Some("witness".into())
        );
        assert_eq!(
            locate(root, Path::new("/e/warchief")).map(|l| l.warband),
            Some(None)
        );
        assert_eq!(locate(root, Path::new("/elsewhere")), None);
    }
}
