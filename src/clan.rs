//! Clan workers: persistent, user-owned clones inside a warband.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::UserSettings;
use crate::encampment::Encampment;
use crate::error::HordeError;
use crate::fsutil;
use crate::raider::{OVERLAY_DIR, RALLY_FILE};
use crate::session::{self, SessionHost, SessionManager, StartRequest};
use crate::store::fields::{AgentFields, AgentState};
use crate::store::{IssueStore, StoreProvider, agent, ids, redirect};
use crate::template::{self, AgentContext};
use crate::vcs::Vcs;
use crate::warband::Warband;

pub const STATE_FILE: &str = "state.json";
pub const DRUMS_DIR: &str = "drums";
pub const BRANCH_PREFIX: &str = "clan/";

/// `clan/<name>/state.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClanState {
    pub name: String,
    pub warband: String,
    pub clone_path: PathBuf,
    pub branch: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClanState {
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(STATE_FILE);
        if !path.exists() {
            return Err(HordeError::NotFound(format!("clan state {}", path.display())).into());
        }
        fsutil::read_json(&path)
    }

    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        fsutil::write_json(&dir.join(STATE_FILE), self)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Work on `clan/<name>` instead of the default branch.
    pub create_branch: bool,
}

/// Outcome of each step of [`ClanManager::pristine`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PristineResult {
    pub name: String,
    pub pulled: bool,
    pub pull_error: Option<String>,
    pub synced: bool,
    pub sync_error: Option<String>,
}

fn validate_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', ' ', '\\']) {
        return Err(HordeError::Validation(format!("invalid clan worker name {name:?}")).into());
    }
    Ok(())
}

pub struct ClanManager<'a> {
    encampment: &'a Encampment,
    warband: &'a Warband,
    vcs: &'a dyn Vcs,
    stores: &'a dyn StoreProvider,
    sessions: SessionManager<'a>,
}

impl<'a> ClanManager<'a> {
    pub fn new(
        encampment: &'a Encampment,
        warband: &'a Warband,
        vcs: &'a dyn Vcs,
        stores: &'a dyn StoreProvider,
        host: &'a dyn SessionHost,
        settings: UserSettings,
    ) -> Self {
        Self {
            encampment,
            warband,
            vcs,
            stores,
            sessions: SessionManager::new(host, settings),
        }
    }

    pub fn dir(&self, name: &str) -> PathBuf {
        self.warband.clan_dir().join(name)
    }

    pub fn session_name(&self, name: &str) -> String {
        session::clan_session(&self.warband.name, name)
    }

    fn agent_id(&self, name: &str) -> String {
        ids::clan_agent_id(self.warband.prefix(), &self.warband.name, name)
    }

    fn store(&self) -> Box<dyn IssueStore + 'a> {
        self.stores.open(&self.warband.store_dir())
    }

    fn context(&self, name: &str, clone: &Path) -> AgentContext {
        AgentContext {
            role: "clan".to_string(),
            warband: self.warband.name.clone(),
            name: Some(name.to_string()),
            address: format!("{}/clan/{name}", self.warband.name),
            store_dir: redirect::resolve_store_dir(clone).display().to_string(),
            banner_bead: None,
        }
    }

    pub fn add(&self, name: &str, opts: &AddOptions) -> anyhow::Result<ClanState> {
        validate_name(name)?;
        let dir = self.dir(name);
        if dir.exists() {
            return Err(HordeError::Exists(format!("clan worker {name}")).into());
        }
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let guard = fsutil::CleanupGuard::new(&dir);

        let reference = self
            .warband
            .config
            .local_repo
            .as_deref()
            .map(Path::new)
            .filter(|p| p.is_dir());
        self.vcs
            .clone_repo(&self.warband.config.git_url, &dir, reference)
            .with_context(|| format!("cloning clan worker {name}"))?;

        let branch = if opts.create_branch {
            let branch = format!("{BRANCH_PREFIX}{name}");
            self.vcs.checkout_new_branch(&dir, &branch)?;
            branch
        } else {
            self.warband.default_branch().to_string()
        };

        fs::create_dir_all(dir.join(DRUMS_DIR))
            .with_context(|| format!("creating {}", dir.join(DRUMS_DIR).display()))?;
        redirect::setup_redirect(self.encampment.root(), &dir)?;
        let ctx = self.context(name, &dir);
        let store_dir = redirect::resolve_store_dir(&dir);
        fsutil::atomic_write(&store_dir.join(RALLY_FILE), template::render_rally(&ctx)?.as_bytes())?;

        let now = Utc::now();
        let state = ClanState {
            name: name.to_string(),
            warband: self.warband.name.clone(),
            clone_path: dir.clone(),
            branch,
            created_at: now,
            updated_at: now,
        };
        state.save(&dir)?;
        guard.disarm();

        match fsutil::copy_tree(&self.warband.runtime_dir().join(OVERLAY_DIR), &dir) {
            Ok(_) => {}
            Err(e) => tracing::warn!(clan = name, error = %format!("{e:#}"), "overlay copy failed"),
        }
        let fields = AgentFields {
            role_type: "clan".to_string(),
            warband: self.warband.name.clone(),
            agent_state: Some(AgentState::Spawning),
            role_bead: Some(ids::role_bead_id("clan")),
            ..Default::default()
        };
        if let Err(e) =
            agent::create_or_reopen_agent_bead(self.store().as_ref(), &self.agent_id(name), &ctx.address, &fields)
        {
            tracing::warn!(clan = name, error = %format!("{e:#}"), "could not write agent record");
        }
        tracing::info!(warband = %self.warband.name, clan = name, "clan worker added");
        Ok(state)
    }

    pub fn get(&self, name: &str) -> anyhow::Result<ClanState> {
        ClanState::load(&self.dir(name))
    }

    /// Clan workers with a readable state file, by name.
    pub fn list(&self) -> anyhow::Result<Vec<ClanState>> {
        let root = self.warband.clan_dir();
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(anyhow::Error::new(e).context(format!("reading {}", root.display()))),
        };
        let mut states = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.join(STATE_FILE).is_file() {
                match ClanState::load(&path) {
                    Ok(state) => states.push(state),
                    Err(e) => tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "skipping unreadable clan state"),
                }
            }
        }
        states.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(states)
    }

    pub fn start(&self, name: &str) -> anyhow::Result<()> {
        let state = self.get(name)?;
        let req = StartRequest {
            session: self.session_name(name),
            work_dir: state.clone_path.clone(),
            agent: self.context(name, &state.clone_path),
            agent_id: self.agent_id(name),
            sender: "warchief/".to_string(),
        };
        self.sessions.start(&req)?;
        self.encampment.events().record(
            "session.start",
            &req.agent.address,
            serde_json::json!({"session": req.session}),
        );
        Ok(())
    }

    pub fn stop(&self, name: &str) -> anyhow::Result<bool> {
        self.sessions.stop(&self.session_name(name))
    }

    /// Rename the directory and state. The old name is restored on failure.
    pub fn rename(&self, old: &str, new: &str) -> anyhow::Result<ClanState> {
        validate_name(new)?;
        let from = self.dir(old);
        let to = self.dir(new);
        let mut state = ClanState::load(&from)?;
        if to.exists() {
            return Err(HordeError::Exists(format!("clan worker {new}")).into());
        }
        if self.sessions.is_running(&self.session_name(old))? {
            return Err(HordeError::Conflict(format!("clan worker {old} has a running session; stop it first")).into());
        }

        fs::rename(&from, &to).with_context(|| format!("renaming {} to {}", from.display(), to.display()))?;
        state.name = new.to_string();
        state.clone_path = to.clone();
        state.updated_at = Utc::now();
        if let Err(e) = state.save(&to) {
            if let Err(back) = fs::rename(&to, &from) {
                tracing::warn!(error = %back, "rollback of clan rename failed");
            }
            return Err(e.context(format!("renaming clan worker {old}")));
        }

        let store = self.store();
        if let Err(e) = agent::close_and_clear_agent_bead(store.as_ref(), &self.agent_id(old), "renamed") {
            tracing::warn!(clan = old, error = %format!("{e:#}"), "could not close old agent record");
        }
        let fields = AgentFields {
            role_type: "clan".to_string(),
            warband: self.warband.name.clone(),
            agent_state: Some(AgentState::Spawning),
            role_bead: Some(ids::role_bead_id("clan")),
            ..Default::default()
        };
        let title = format!("{}/clan/{new}", self.warband.name);
        if let Err(e) = agent::create_or_reopen_agent_bead(store.as_ref(), &self.agent_id(new), &title, &fields) {
            tracing::warn!(clan = new, error = %format!("{e:#}"), "could not write agent record");
        }
        tracing::info!(warband = %self.warband.name, from = old, to = new, "clan worker renamed");
        Ok(state)
    }

    /// `pull --rebase`, then a store sync. Each step's outcome is recorded.
    pub fn pristine(&self, name: &str) -> anyhow::Result<PristineResult> {
        let state = self.get(name)?;
        let mut result = PristineResult {
            name: name.to_string(),
            ..Default::default()
        };
        match self.vcs.pull_rebase(&state.clone_path) {
            Ok(()) => result.pulled = true,
            Err(e) => result.pull_error = Some(format!("{e:#}")),
        }
        let store = self.stores.open(&redirect::resolve_store_dir(&state.clone_path));
        match store.sync() {
            Ok(()) => result.synced = true,
            Err(e) => result.sync_error = Some(format!("{e:#}")),
        }
        Ok(result)
    }

    /// Delete the clone. Refuses uncommitted, stashed or unpushed work unless forced.
    pub fn remove(&self, name: &str, force: bool) -> anyhow::Result<()> {
        let dir = self.dir(name);
        if !dir.exists() {
            return Err(HordeError::NotFound(format!("clan worker {name}")).into());
        }
        if !force {
            let status = self.vcs.status(&dir)?;
            if !status.is_clean() {
                return Err(HordeError::Conflict(format!(
                    "clan worker {name} is not clean ({}); use --force to remove anyway",
                    status.cleanup_status()
                ))
                .into());
            }
        }
        if let Err(e) = self.stop(name) {
            tracing::warn!(clan = name, error = %format!("{e:#}"), "could not stop session");
        }
        fs::remove_dir_all(&dir).with_context(|| format!("removing {}", dir.display()))?;
        if let Err(e) = agent::close_and_clear_agent_bead(self.store().as_ref(), &self.agent_id(name), "removed") {
            tracing::warn!(clan = name, error = %format!("{e:#}"), "could not close agent record");
        }
        tracing::info!(warband = %self.warband.name, clan = name, "clan worker removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fake::FakeHost;
    use crate::store::memory::MemoryStore;
    use crate::vcs::WorkStatus;
    use crate::vcs::fake::FakeVcs;
    use crate::warband::{AddOptions as WarbandOptions, WarbandManager};

    struct Fixture {
        _dir: tempfile::TempDir,
        camp: Encampment,
        warband: Warband,
        vcs: FakeVcs,
        store: MemoryStore,
        host: FakeHost,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = MemoryStore::new("hd");
            let camp = Encampment::init(dir.path(), "camp", &store).unwrap();
            let vcs = FakeVcs::default();
            let warband = WarbandManager::new(&camp, &vcs, &store)
                .add(&WarbandOptions {
                    name: "horde".into(),
                    git_url: "git@host:o/horde.git".into(),
                    prefix: Some("hd".into()),
                    ..Default::default()
                })
                .unwrap();
            Self {
                _dir: dir,
                camp,
                warband,
                vcs,
                store,
                host: FakeHost::default(),
            }
        }

        fn manager(&self) -> ClanManager<'_> {
            ClanManager::new(
                &self.camp,
                &self.warband,
                &self.vcs,
                &self.store,
                &self.host,
                UserSettings::default(),
            )
        }
    }

    #[test]
    fn add_lays_out_clone() {
        let fx = Fixture::new();
        let state = fx
            .manager()
            .add("max", &AddOptions { create_branch: true })
            .unwrap();
        let dir = fx.warband.clan_dir().join("max");
        assert_eq!(state.clone_path, dir);
        assert_eq!(state.branch, "clan/max");
        assert!(dir.join(DRUMS_DIR).is_dir());
        assert_eq!(redirect::read_redirect(&dir.join(".store")).as_deref(), Some("../../.store"));
        assert_eq!(ClanState::load(&dir).unwrap(), state);
        assert!(fx.store.get("hd-horde-clan-max").is_some());
    }

    #[test]
    fn add_without_branch_uses_default() {
        let fx = Fixture::new();
        let state = fx.manager().add("max", &AddOptions::default()).unwrap();
        assert_eq!(state.branch, "main");
        assert!(fx.manager().add("max", &AddOptions::default()).is_err());
        assert!(fx.manager().add("a/b", &AddOptions::default()).is_err());
    }

    #[test]
    fn start_and_stop() {
        let fx = Fixture::new();
        let manager = fx.manager();
        manager.add("max", &AddOptions::default()).unwrap();
        manager.start("max").unwrap();
        assert!(fx.host.has_session("gt-horde-clan-max").unwrap());
        assert_eq!(fx.host.hook("gt-horde-clan-max").as_deref(), Some("hd-horde-clan-max"));
        assert!(manager.stop("max").unwrap());
        assert!(!manager.stop("max").unwrap());
    }

    #[test]
    fn rename_moves_state() {
        let fx = Fixture::new();
        let manager = fx.manager();
        manager.add("max", &AddOptions::default()).unwrap();
        let state = manager.rename("max", "joe").unwrap();
        assert_eq!(state.name, "joe");
        assert!(!fx.warband.clan_dir().join("max").exists());
        assert_eq!(manager.get("joe").unwrap().clone_path, fx.warband.clan_dir().join("joe"));
        assert!(fx.store.get("hd-horde-clan-max").unwrap().is_closed());
        assert!(!fx.store.get("hd-horde-clan-joe").unwrap().is_closed());
    }

    #[test]
    fn rename_refuses_running_session() {
        let fx = Fixture::new();
        let manager = fx.manager();
        manager.add("max", &AddOptions::default()).unwrap();
        manager.start("max").unwrap();
        assert!(manager.rename("max", "joe").is_err());
        assert!(fx.warband.clan_dir().join("max").exists());
    }

    #[test]
    fn pristine_records_each_step() {
        let fx = Fixture::new();
        let manager = fx.manager();
        manager.add("max", &AddOptions::default()).unwrap();
        fx.vcs.fail_on("pull_rebase");
        let result = manager.pristine("max").unwrap();
        assert!(!result.pulled);
        assert!(result.pull_error.unwrap().contains("pull_rebase failed"));
        assert!(result.synced);
        assert_eq!(fx.store.sync_count(), 1);
    }

    #[test]
    fn remove_refuses_dirty_unless_forced() {
        let fx = Fixture::new();
        let manager = fx.manager();
        manager.add("max", &AddOptions::default()).unwrap();
        let dir = fx.warband.clan_dir().join("max");
        fx.vcs.set_status(
            &dir,
            WorkStatus {
                uncommitted: true,
                ..Default::default()
            },
        );
        let err = manager.remove("max", false).unwrap_err();
        assert_eq!(crate::error::kind_of(&err), Some(crate::error::ErrorKind::Conflict));
        manager.remove("max", true).unwrap();
        assert!(!dir.exists());
        assert!(manager.list().unwrap().is_empty());
    }
}
