//! The encampment root: marker, warband registry, encampment store and routes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::{ENCAMPMENT_FILE, EncampmentConfig, WarbandRegistry};
use crate::error::HordeError;
use crate::events::EventLog;
use crate::fsutil::{self, CleanupGuard};
use crate::store::routes::Routes;
use crate::store::{STORE_DIR_NAME, StoreProvider, agent, ids};
use crate::workspace;

pub const PLUGINS_DIR: &str = "plugins";

#[derive(Debug, Clone)]
pub struct Encampment {
    root: PathBuf,
}

impl Encampment {
    /// Handle for an existing encampment at `root`.
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        if !root.join(workspace::PRIMARY_MARKER).is_file()
            && !root.join(workspace::SECONDARY_MARKER).is_dir()
        {
            return Err(HordeError::NoWorkspace(root.display().to_string()).into());
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// The encampment containing the current directory.
    pub fn discover() -> anyhow::Result<Self> {
        let root = workspace::find_from_cwd()?;
        Ok(Self { root })
    }

    /// Create a fresh encampment at `root`.
    ///
    /// Writes the marker and an empty registry, initializes the encampment store
    /// with the `hq` prefix, seeds the routing table and creates `plugins/`.
    /// Role definition records are best-effort.
    pub fn init(root: &Path, name: &str, stores: &dyn StoreProvider) -> anyhow::Result<Self> {
        if root.join(workspace::PRIMARY_MARKER).exists() {
            return Err(HordeError::Exists(format!("encampment at {}", root.display())).into());
        }
        fs::create_dir_all(root).with_context(|| format!("creating {}", root.display()))?;

        let warchief_dir = root.join(workspace::SECONDARY_MARKER);
        let guard = (!warchief_dir.exists()).then(|| CleanupGuard::new(&warchief_dir));
        let store_dir = root.join(STORE_DIR_NAME);
        let store_guard = (!store_dir.exists()).then(|| CleanupGuard::new(&store_dir));

        fsutil::write_json(&warchief_dir.join(ENCAMPMENT_FILE), &EncampmentConfig::new(name))?;
        WarbandRegistry::load(root)?.save(root)?;

        let store = stores.open(&store_dir);
        store.init(ids::ENCAMPMENT_PREFIX)?;

        let mut routes = Routes::load(root)?;
        routes.add(ids::ENCAMPMENT_PREFIX, ".");
        routes.save(root)?;

        fs::create_dir_all(root.join(PLUGINS_DIR))
            .with_context(|| format!("creating {}", root.join(PLUGINS_DIR).display()))?;

        if let Err(e) = agent::ensure_role_beads(store.as_ref()) {
            tracing::warn!(error = %format!("{e:#}"), "could not create role definitions");
        }

        if let Some(guard) = guard {
            guard.disarm();
        }
        if let Some(guard) = store_guard {
            guard.disarm();
        }
        tracing::info!(root = %root.display(), name, "encampment created");
        let encampment = Self {
            root: root.to_path_buf(),
        };
        encampment
            .events()
            .record("encampment.init", "warchief/", serde_json::json!({"name": name}));
        Ok(encampment)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> anyhow::Result<EncampmentConfig> {
        fsutil::read_json(&self.root.join(workspace::PRIMARY_MARKER))
    }

    pub fn store_dir(&self) -> PathBuf {
        crate::store::redirect::resolve_store_dir(&self.root)
    }

    pub fn warband_dir(&self, warband: &str) -> PathBuf {
        self.root.join(warband)
    }

    pub fn registry(&self) -> anyhow::Result<WarbandRegistry> {
        WarbandRegistry::load(&self.root)
    }

    pub fn routes(&self) -> anyhow::Result<Routes> {
        Routes::load(&self.root)
    }

    pub fn events(&self) -> EventLog {
        EventLog::new(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn init_lays_out_the_encampment() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("camp");
        let store = MemoryStore::new("hq");

        let camp = Encampment::init(&root, "camp", &store).unwrap();
        assert!(root.join("warchief/encampment.json").is_file());
        assert!(root.join("warchief/warbands.json").is_file());
        assert!(root.join("plugins").is_dir());
        assert_eq!(store.inits(), vec!["hq"]);
        assert_eq!(store.opened(), vec![root.join(".store")]);
        assert_eq!(camp.routes().unwrap().resolve("hq-warchief").unwrap().path, ".");
        assert!(store.get("hq-raider-role").is_some());
        assert_eq!(camp.config().unwrap().name, "camp");
        assert!(camp.registry().unwrap().warbands.is_empty());
        assert_eq!(camp.events().recent(1).unwrap()[0].kind, "encampment.init");
    }

    #[test]
    fn init_refuses_existing_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new("hq");
        Encampment::init(dir.path(), "camp", &store).unwrap();
        let err = Encampment::init(dir.path(), "camp", &store).unwrap_err();
        assert_eq!(crate::error::kind_of(&err), Some(crate::error::ErrorKind::Exists));
    }

    #[test]
    fn failed_store_init_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("camp");
        let store = MemoryStore::new("hq");
        store.set_unavailable(true);
        assert!(Encampment::init(&root, "camp", &store).is_err());
        assert!(!root.join("warchief").exists());
        assert!(Encampment::open(&root).is_err());
    }
}
