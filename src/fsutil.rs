//! Small filesystem helpers: atomic replacement, appends, and rollback guards.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Replace `path` atomically: write a sibling temp file, then rename over.
pub fn atomic_write(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("creating temp file in {}", parent.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("writing temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("syncing temp file for {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

/// Pretty JSON, newline-terminated, written atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let mut data = serde_json::to_vec_pretty(value).context("serializing JSON")?;
    data.push(b'\n');
    atomic_write(path, &data)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}

/// Append one line with `O_APPEND` semantics.
pub fn append_line(path: &Path, line: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut buf = line.trim_end_matches('\n').to_string();
    buf.push('\n');
    file.write_all(buf.as_bytes())
        .with_context(|| format!("appending to {}", path.display()))
}

/// Copy every regular file under `src` into `dst`, preserving relative paths.
/// Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path) -> anyhow::Result<usize> {
    let mut copied = 0;
    if !src.is_dir() {
        return Ok(0);
    }
    for entry in fs::read_dir(src).with_context(|| format!("reading {}", src.display()))? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copied += copy_tree(&from, &to)?;
        } else if file_type.is_file() {
            fs::create_dir_all(dst).with_context(|| format!("creating {}", dst.display()))?;
            fs::copy(&from, &to)
                .with_context(|| format!("copying {} to {}", from.display(), to.display()))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Removes a freshly created directory on drop unless disarmed.
///
/// Used by multi-step creators so a failure part-way leaves no persistent effect.
pub struct CleanupGuard {
    path: PathBuf,
    armed: bool,
}

impl CleanupGuard {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            armed: true,
        }
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.armed && self.path.exists() {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "rollback cleanup failed");
            } else {
                tracing::info!(path = %self.path.display(), "rolled back partial creation");
            }
        }
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` into the parent.
/// Symlinks are not resolved.
pub fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
