//! Raider name pool.
//!
//! The in-use set is never stored: every allocation re-derives it from the
//! raider directories on disk. Only the overflow counter persists.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fsutil;
use crate::session::{self, SessionHost};

pub const POOL_FILE: &str = "namepool.json";
const POOL_NAME_PREFIX: &str = "raider-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct PoolState {
    overflow_next: u32,
}

#[derive(Debug, Clone)]
pub struct NamePool {
    path: PathBuf,
    warband: String,
    size: u32,
    overflow_next: u32,
    in_use: BTreeSet<String>,
}

pub fn pool_name(n: u32) -> String {
    format!("{POOL_NAME_PREFIX}{n:02}")
}

impl NamePool {
    /// Load the pool for `warband` from its runtime directory. A missing or
    /// unreadable state file starts overflow right after the pool.
    pub fn load(runtime_dir: &Path, warband: &str, size: u32) -> Self {
        let path = runtime_dir.join(POOL_FILE);
        let first_overflow = size + 1;
        let overflow_next = match fsutil::read_json::<PoolState>(&path) {
            Ok(state) => state.overflow_next.max(first_overflow),
            Err(e) => {
                if path.exists() {
                    tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "ignoring unreadable name pool");
                }
                first_overflow
            }
        };
        Self {
            path,
            warband: warband.to_string(),
            size,
            overflow_next,
            in_use: BTreeSet::new(),
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        fsutil::write_json(
            &self.path,
            &PoolState {
                overflow_next: self.overflow_next,
            },
        )
    }

    /// Pool names in allocation order.
    pub fn names(&self) -> impl Iterator<Item = String> + '_ {
        (1..=self.size).map(pool_name)
    }

    pub fn in_use(&self) -> &BTreeSet<String> {
        &self.in_use
    }

    pub fn overflow_next(&self) -> u32 {
        self.overflow_next
    }

    /// Rebuild the in-use set from `raiders_dir`. A pool name with a live
    /// session but no directory is an orphan: its session is killed and the
    /// name stays free.
    pub fn reconcile(&mut self, raiders_dir: &Path, host: &dyn SessionHost) -> anyhow::Result<()> {
        self.in_use = existing_raiders(raiders_dir)?.into_iter().collect();

        let live: BTreeSet<String> = host.list_sessions()?.into_iter().collect();
        let names: Vec<String> = self.names().collect();
        for name in names {
            let session = session::raider_session(&self.warband, &name);
            if live.contains(&session) && !self.in_use.contains(&name) {
                tracing::warn!(warband = %self.warband, raider = %name, session = %session, "killing orphan session");
                host.kill_session(&session)?;
            }
        }
        Ok(())
    }

    /// First free pool name, else the next overflow name. Call [`reconcile`]
    /// first; the returned name is marked in use.
    ///
    /// [`reconcile`]: NamePool::reconcile
    pub fn allocate(&mut self) -> anyhow::Result<String> {
        let free = self.names().find(|n| !self.in_use.contains(n));
        let name = match free {
            Some(name) => name,
            None => {
                let name = format!("{}-{}", self.warband, self.overflow_next);
                self.overflow_next += 1;
                self.save()?;
                name
            }
        };
        self.in_use.insert(name.clone());
        tracing::debug!(warband = %self.warband, raider = %name, "name allocated");
        Ok(name)
    }

    pub fn release(&mut self, name: &str) {
        self.in_use.remove(name);
    }
}

/// Names of raider directories under `raiders_dir`, sorted.
pub fn existing_raiders(raiders_dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    let entries = match fs::read_dir(raiders_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(anyhow::Error::new(e).context(format!("reading {}", raiders_dir.display()))),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() && !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fake::FakeHost;

    #[test]
    fn allocates_in_order_skipping_existing() {
        let dir = tempfile::tempdir().unwrap();
        let raiders = dir.path().join("raiders");
        fs::create_dir_all(raiders.join("raider-01")).unwrap();
        fs::create_dir_all(raiders.join("raider-03")).unwrap();

        let host = FakeHost::default();
        let mut pool = NamePool::load(&dir.path().join(".runtime"), "horde", 50);
        pool.reconcile(&raiders, &host).unwrap();
        assert_eq!(pool.in_use().len(), 2);
        assert_eq!(pool.allocate().unwrap(), "raider-02");
        assert_eq!(pool.allocate().unwrap(), "raider-04");
    }

    #[test]
    fn orphan_session_is_killed_and_name_reused() {
        let dir = tempfile::tempdir().unwrap();
        let raiders = dir.path().join("raiders");
        let host = FakeHost::default();
        host.new_session_with_command("gt-horde-raider-01", dir.path(), "claude")
            .unwrap();

        let mut pool = NamePool::load(&dir.path().join(".runtime"), "horde", 50);
        pool.in_use.insert("raider-01".into());
        pool.reconcile(&raiders, &host).unwrap();

        assert_eq!(host.killed(), vec!["gt-horde-raider-01"]);
        assert!(pool.in_use().is_empty());
        assert_eq!(pool.allocate().unwrap(), "raider-01");
    }

    #[test]
    fn overflow_persists_monotonically() {
        let dir = tempfile::tempdir().unwrap();
        let raiders = dir.path().join("raiders");
        for n in 1..=2 {
            fs::create_dir_all(raiders.join(pool_name(n))).unwrap();
        }
        let runtime = dir.path().join(".runtime");
        let host = FakeHost::default();

        let mut pool = NamePool::load(&runtime, "horde", 2);
        pool.reconcile(&raiders, &host).unwrap();
        assert_eq!(pool.allocate().unwrap(), "horde-3");
        assert_eq!(pool.allocate().unwrap(), "horde-4");

        let raw = fs::read_to_string(runtime.join(POOL_FILE)).unwrap();
        assert!(raw.contains("\"overflow_next\": 5"));
        assert!(!raw.contains("in_use"));

        let mut reloaded = NamePool::load(&runtime, "horde", 2);
        reloaded.reconcile(&raiders, &host).unwrap();
        assert_eq!(reloaded.allocate().unwrap(), "horde-5");
    }

    #[test]
    fn reconcile_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let raiders = dir.path().join("raiders");
        fs::create_dir_all(raiders.join("raider-02")).unwrap();
        let host = FakeHost::default();
        let mut pool = NamePool::load(&dir.path().join(".runtime"), "horde", 50);
        pool.reconcile(&raiders, &host).unwrap();
        let first = pool.in_use().clone();
        pool.reconcile(&raiders, &host).unwrap();
        assert_eq!(pool.in_use(), &first);
        assert_eq!(first.iter().filter(|n| *n == "raider-02").count(), 1);
    }
}
