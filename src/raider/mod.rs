//! Raiders: ephemeral workers, one worktree and one branch per muster.

pub mod pool;
pub mod stale;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::UserSettings;
use crate::encampment::Encampment;
use crate::error::HordeError;
use crate::fsutil;
use crate::session::{self, SessionHost, SessionManager, StartRequest};
use crate::store::fields::{AgentFields, AgentState, CleanupStatus};
use crate::store::{IssueStore, STATUS_BANNERED, StoreProvider, UpdatePatch, agent, ids, redirect};
use crate::subprocess::Tool;
use crate::template::{self, AgentContext};
use crate::vcs::Vcs;
use crate::warband::Warband;

use pool::NamePool;
use stale::StaleInfo;

pub const BRANCH_PREFIX: &str = "raider/";
pub const OVERLAY_DIR: &str = "overlay";
pub const SETUP_HOOKS_DIR: &str = "setup-hooks";
pub const RALLY_FILE: &str = "RALLY.md";
pub const AGENTS_FILE: &str = "AGENTS.md";

const SETUP_HOOK_TIMEOUT: Duration = Duration::from_secs(120);

/// Derived session-level state. There is no idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RaiderState {
    Working,
    Done,
    Stuck,
}

impl RaiderState {
    /// Stuck is an explicit self-signal; otherwise an assigned banner means working.
    pub fn derive(fields: Option<&AgentFields>) -> Self {
        match fields {
            Some(f) if f.agent_state == Some(AgentState::Stuck) => RaiderState::Stuck,
            Some(f) if f.banner_bead.is_some() => RaiderState::Working,
            _ => RaiderState::Done,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RaiderState::Working => "working",
            RaiderState::Done => "done",
            RaiderState::Stuck => "stuck",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Raider {
    pub name: String,
    pub warband: String,
    pub clone_path: PathBuf,
    pub branch: String,
    pub state: RaiderState,
    pub banner_bead: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    pub banner_bead: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Allow uncommitted changes; stash and unpushed commits still block.
    pub force: bool,
    /// Skip every check.
    pub nuclear: bool,
}

/// Whether removal may proceed given a worktree's cleanup status.
pub fn removal_allowed(status: CleanupStatus, opts: RemoveOptions) -> bool {
    if opts.nuclear {
        return true;
    }
    match status {
        CleanupStatus::Clean => true,
        CleanupStatus::HasUncommitted => opts.force,
        CleanupStatus::HasStash | CleanupStatus::HasUnpushed | CleanupStatus::Unknown => false,
    }
}

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// `raider/<name>-<base36 ms>`, unique per muster.
pub fn branch_name(name: &str, now: DateTime<Utc>) -> String {
    let ms = u64::try_from(now.timestamp_millis()).unwrap_or_default();
    format!("{BRANCH_PREFIX}{name}-{}", base36(ms))
}

/// Drums address of a raider.
pub fn address(warband: &str, name: &str) -> String {
    format!("{warband}/raiders/{name}")
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path).and_then(|m| m.modified()).ok().map(DateTime::<Utc>::from)
}

/// Musters, inspects and removes the raiders of one warband.
pub struct RaiderManager<'a> {
    encampment: &'a Encampment,
    warband: &'a Warband,
    vcs: &'a dyn Vcs,
    stores: &'a dyn StoreProvider,
    sessions: SessionManager<'a>,
    settings: UserSettings,
}

impl<'a> RaiderManager<'a> {
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
            sessions: SessionManager::new(host, settings.clone()),
            settings,
        }
    }

    fn store(&self) -> Box<dyn IssueStore + 'a> {
        self.stores.open(&self.warband.store_dir())
    }

    fn host(&self) -> &'a dyn SessionHost {
        self.sessions.host()
    }

    pub fn raider_dir(&self, name: &str) -> PathBuf {
        self.warband.raiders_dir().join(name)
    }

    /// Worktree path: `raiders/<name>/<warband>/`, or the legacy
    /// `raiders/<name>/` when only that layout exists.
    pub fn clone_path(&self, name: &str) -> PathBuf {
        let dir = self.raider_dir(name);
        let nested = dir.join(&self.warband.name);
        if !nested.exists() && dir.join(".git").exists() {
            return dir;
        }
        nested
    }

    pub fn agent_id(&self, name: &str) -> String {
        ids::raider_agent_id(self.warband.prefix(), &self.warband.name, name)
    }

    pub fn session_name(&self, name: &str) -> String {
        session::raider_session(&self.warband.name, name)
    }

    fn pool(&self) -> NamePool {
        NamePool::load(&self.warband.runtime_dir(), &self.warband.name, self.settings.pool_size)
    }

    /// Reconcile the pool with disk and sessions, then hand out a name.
    pub fn allocate_name(&self) -> anyhow::Result<String> {
        let mut pool = self.pool();
        pool.reconcile(&self.warband.raiders_dir(), self.host())?;
        pool.allocate()
    }

    /// Muster a raider. On failure nothing persistent is left behind except
    /// the best-effort steps.
    pub fn add(&self, name: &str, opts: &AddOptions) -> anyhow::Result<Raider> {
        let dir = self.raider_dir(name);
        if dir.exists() {
            return Err(HordeError::Exists(format!("raider {name} ({})", dir.display())).into());
        }

        let repo = self.warband.repo_base();
        if let Err(e) = self.vcs.fetch(&repo, "origin") {
            tracing::warn!(warband = %self.warband.name, error = %format!("{e:#}"), "fetch failed, using existing refs");
        }
        let start_point = format!("origin/{}", self.warband.default_branch());
        let now = Utc::now();
        let branch = branch_name(name, now);
        let clone = dir.join(&self.warband.name);

        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let guard = fsutil::CleanupGuard::new(&dir);
        if let Err(e) = self.vcs.worktree_add(&repo, &clone, &branch, &start_point) {
            if let Err(prune) = self.vcs.worktree_prune(&repo) {
                tracing::debug!(error = %format!("{prune:#}"), "prune after failed worktree add");
            }
            return Err(e.context(format!("creating worktree for raider {name}")));
        }
        if let Err(e) = self.provision(name, &clone, opts) {
            self.undo_worktree(&repo, &clone, &branch);
            return Err(e);
        }
        guard.disarm();

        self.overlay(&clone);
        self.write_agent_record(name, opts);
        if let Some(ref banner) = opts.banner_bead {
            self.mark_bannered(banner, name);
        }

        self.encampment.events().record(
            "raider.muster",
            &format!("{}/witness", self.warband.name),
            serde_json::json!({"warband": self.warband.name, "raider": name, "branch": branch, "banner": opts.banner_bead}),
        );
        tracing::info!(warband = %self.warband.name, raider = name, branch = %branch, "raider mustered");
        Ok(Raider {
            name: name.to_string(),
            warband: self.warband.name.clone(),
            clone_path: clone,
            branch,
            state: RaiderState::Working,
            banner_bead: opts.banner_bead.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// AGENTS.md, store redirect and RALLY.md. These must succeed.
    fn provision(&self, name: &str, clone: &Path, opts: &AddOptions) -> anyhow::Result<()> {
        let agents = clone.join(AGENTS_FILE);
        if !agents.exists() {
            let source = self.warband.warchief_clone().join(AGENTS_FILE);
            let content = if source.is_file() {
                let existing = fs::read_to_string(&source)
                    .with_context(|| format!("reading {}", source.display()))?;
                template::update_managed_section(&existing, &self.warband.name)?
            } else {
                template::render_agents_md(&self.warband.name)?
            };
            fs::write(&agents, content).with_context(|| format!("writing {}", agents.display()))?;
        }

        redirect::setup_redirect(self.encampment.root(), clone)?;
        let store_dir = redirect::resolve_store_dir(clone);
        let ctx = self.agent_context(name, &store_dir, opts.banner_bead.clone());
        fsutil::atomic_write(&store_dir.join(RALLY_FILE), template::render_rally(&ctx)?.as_bytes())
    }

    fn undo_worktree(&self, repo: &Path, clone: &Path, branch: &str) {
        if let Err(e) = self.vcs.worktree_remove(repo, clone, true) {
            tracing::warn!(path = %clone.display(), error = %format!("{e:#}"), "rollback: worktree remove failed");
        }
        if let Err(e) = self.vcs.worktree_prune(repo) {
            tracing::debug!(error = %format!("{e:#}"), "rollback: prune failed");
        }
        if let Err(e) = self.vcs.delete_branch(repo, branch, true) {
            tracing::debug!(branch, error = %format!("{e:#}"), "rollback: branch delete failed");
        }
    }

    fn agent_context(&self, name: &str, store_dir: &Path, banner_bead: Option<String>) -> AgentContext {
        AgentContext {
            role: "raider".to_string(),
            warband: self.warband.name.clone(),
            name: Some(name.to_string()),
            address: address(&self.warband.name, name),
            store_dir: store_dir.display().to_string(),
            banner_bead,
        }
    }

    /// Copy `.runtime/overlay/` into the worktree, then run every file in
    /// `.runtime/setup-hooks/` from the worktree. Best-effort.
    fn overlay(&self, clone: &Path) {
        let runtime = self.warband.runtime_dir();
        match fsutil::copy_tree(&runtime.join(OVERLAY_DIR), clone) {
            Ok(0) => {}
            Ok(n) => tracing::debug!(path = %clone.display(), files = n, "overlay copied"),
            Err(e) => tracing::warn!(path = %clone.display(), error = %format!("{e:#}"), "overlay copy failed"),
        }

        let hooks_dir = runtime.join(SETUP_HOOKS_DIR);
        let Ok(entries) = fs::read_dir(&hooks_dir) else {
            return;
        };
        let mut hooks: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        hooks.sort();
        for hook in hooks {
            let result = Tool::new(&hook.to_string_lossy())
                .dir(clone)
                .env("WARBAND", &self.warband.name)
                .timeout(SETUP_HOOK_TIMEOUT)
                .run_ok();
            if let Err(e) = result {
                tracing::warn!(hook = %hook.display(), error = %format!("{e:#}"), "setup hook failed");
            }
        }
    }

    fn write_agent_record(&self, name: &str, opts: &AddOptions) {
        let fields = AgentFields {
            role_type: "raider".to_string(),
            warband: self.warband.name.clone(),
            agent_state: Some(AgentState::Spawning),
            role_bead: Some(ids::role_bead_id("raider")),
            banner_bead: opts.banner_bead.clone(),
            ..Default::default()
        };
        let id = self.agent_id(name);
        let title = address(&self.warband.name, name);
        if let Err(e) = agent::create_or_reopen_agent_bead(self.store().as_ref(), &id, &title, &fields) {
            tracing::warn!(raider = name, id = %id, error = %format!("{e:#}"), "could not write agent record");
        }
    }

    fn mark_bannered(&self, banner: &str, name: &str) {
        let patch = UpdatePatch {
            status: Some(STATUS_BANNERED.to_string()),
            assignee: Some(address(&self.warband.name, name)),
            ..Default::default()
        };
        if let Err(e) = self.store().update(banner, &patch) {
            tracing::warn!(raider = name, banner, error = %format!("{e:#}"), "could not assign banner");
        }
    }

    /// Re-muster a name left behind by stale state: close the old record,
    /// drop the old worktree and start over on a fresh branch.
    pub fn repair(&self, name: &str, opts: &AddOptions) -> anyhow::Result<Raider> {
        tracing::info!(warband = %self.warband.name, raider = name, "repairing raider");
        agent::close_and_clear_agent_bead(self.store().as_ref(), &self.agent_id(name), "repair")?;
        let dir = self.raider_dir(name);
        if dir.exists() {
            let repo = self.warband.repo_base();
            let clone = self.clone_path(name);
            if let Err(e) = self.vcs.worktree_remove(&repo, &clone, true) {
                tracing::debug!(error = %format!("{e:#}"), "worktree remove during repair");
            }
            if dir.exists() {
                fs::remove_dir_all(&dir).with_context(|| format!("removing {}", dir.display()))?;
            }
            self.vcs.worktree_prune(&repo)?;
        }
        self.add(name, opts)
    }

    /// Self-reported cleanup status, falling back to inspecting the worktree.
    pub fn cleanup_status(&self, name: &str) -> anyhow::Result<CleanupStatus> {
        let reported = agent::agent_fields(self.store().as_ref(), &self.agent_id(name))
            .unwrap_or_else(|e| {
                tracing::warn!(raider = name, error = %format!("{e:#}"), "agent record unreadable");
                None
            })
            .map(|f| f.cleanup())
            .unwrap_or(CleanupStatus::Unknown);
        if reported != CleanupStatus::Unknown {
            return Ok(reported);
        }
        let clone = self.clone_path(name);
        if !clone.exists() {
            return Ok(CleanupStatus::Clean);
        }
        Ok(self.vcs.status(&clone)?.cleanup_status())
    }

    /// Remove a raider: session, worktree, agent record and pool name.
    pub fn remove(&self, name: &str, opts: RemoveOptions) -> anyhow::Result<()> {
        let dir = self.raider_dir(name);
        let id = self.agent_id(name);
        if !dir.exists() && self.store().find(&id)?.is_none() {
            return Err(HordeError::NotFound(format!("raider {name}")).into());
        }

        if !opts.nuclear {
            let status = self.cleanup_status(name)?;
            if !removal_allowed(status, opts) {
                let hint = if status == CleanupStatus::HasUncommitted {
                    "; use --force to discard uncommitted changes"
                } else {
                    "; use --nuclear to discard it anyway"
                };
                return Err(HordeError::Conflict(format!("raider {name} is not clean ({status}){hint}")).into());
            }
        }

        let session = self.session_name(name);
        if let Err(e) = self.sessions.stop(&session) {
            tracing::warn!(session = %session, error = %format!("{e:#}"), "could not stop session");
        }

        let repo = self.warband.repo_base();
        if dir.exists() {
            let clone = self.clone_path(name);
            if let Err(e) = self.vcs.worktree_remove(&repo, &clone, true) {
                tracing::warn!(path = %clone.display(), error = %format!("{e:#}"), "worktree remove failed, deleting directory");
            }
            if dir.exists() {
                fs::remove_dir_all(&dir).with_context(|| format!("removing {}", dir.display()))?;
            }
        }
        if let Err(e) = self.vcs.worktree_prune(&repo) {
            tracing::warn!(error = %format!("{e:#}"), "worktree prune failed");
        }

        agent::close_and_clear_agent_bead(self.store().as_ref(), &id, "removed")?;
        self.pool().release(name);

        self.encampment.events().record(
            "raider.nuke",
            &format!("{}/witness", self.warband.name),
            serde_json::json!({"warband": self.warband.name, "raider": name, "nuclear": opts.nuclear}),
        );
        tracing::info!(warband = %self.warband.name, raider = name, "raider removed");
        Ok(())
    }

    pub fn get(&self, name: &str) -> anyhow::Result<Raider> {
        let dir = self.raider_dir(name);
        if !dir.is_dir() {
            return Err(HordeError::NotFound(format!("raider {name}")).into());
        }
        let clone = self.clone_path(name);
        let fields = agent::agent_fields(self.store().as_ref(), &self.agent_id(name))?;
        let branch = self.vcs.current_branch(&clone).unwrap_or_default();
        let created_at = fs::metadata(&dir)
            .and_then(|m| m.created().or_else(|_| m.modified()))
            .ok()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);
        let updated_at = modified_at(&clone).unwrap_or(created_at);
        Ok(Raider {
            name: name.to_string(),
            warband: self.warband.name.clone(),
            clone_path: clone,
            branch,
            state: RaiderState::derive(fields.as_ref()),
            banner_bead: fields.and_then(|f| f.banner_bead),
            created_at,
            updated_at,
        })
    }

    /// Every raider with a directory on disk, by name.
    pub fn list(&self) -> anyhow::Result<Vec<Raider>> {
        pool::existing_raiders(&self.warband.raiders_dir())?
            .iter()
            .map(|name| self.get(name))
            .collect()
    }

    /// Work finished: drop the banner and report done.
    pub fn clear_issue(&self, name: &str) -> anyhow::Result<()> {
        let store = self.store();
        let id = self.agent_id(name);
        agent::set_banner_bead(store.as_ref(), &id, None)?;
        agent::update_agent_state(store.as_ref(), &id, AgentState::Done)
    }

    pub fn mark_stuck(&self, name: &str) -> anyhow::Result<()> {
        agent::update_agent_state(self.store().as_ref(), &self.agent_id(name), AgentState::Stuck)
    }

    pub fn resume(&self, name: &str) -> anyhow::Result<()> {
        agent::update_agent_state(self.store().as_ref(), &self.agent_id(name), AgentState::Running)
    }

    /// Start the raider's session.
    pub fn start(&self, name: &str) -> anyhow::Result<()> {
        let raider = self.get(name)?;
        let store_dir = redirect::resolve_store_dir(&raider.clone_path);
        let req = StartRequest {
            session: self.session_name(name),
            work_dir: raider.clone_path.clone(),
            agent: self.agent_context(name, &store_dir, raider.banner_bead.clone()),
            agent_id: self.agent_id(name),
            sender: format!("{}/witness", self.warband.name),
        };
        self.sessions.start(&req)?;
        if let Err(e) = agent::update_agent_state(self.store().as_ref(), &self.agent_id(name), AgentState::Running) {
            tracing::warn!(raider = name, error = %format!("{e:#}"), "could not mark agent running");
        }
        self.encampment.events().record(
            "session.start",
            &format!("{}/witness", self.warband.name),
            serde_json::json!({"session": req.session}),
        );
        Ok(())
    }

    /// Delete `raider/*` branches no existing raider has checked out.
    /// Returns how many were deleted.
    pub fn cleanup_stale_branches(&self) -> anyhow::Result<usize> {
        let repo = self.warband.repo_base();
        let branches = self.vcs.list_branches(&repo, &format!("{BRANCH_PREFIX}*"))?;
        if branches.is_empty() {
            return Ok(0);
        }
        let mut live = std::collections::BTreeSet::new();
        for name in pool::existing_raiders(&self.warband.raiders_dir())? {
            match self.vcs.current_branch(&self.clone_path(&name)) {
                Ok(branch) => {
                    live.insert(branch);
                }
                Err(e) => tracing::warn!(raider = %name, error = %format!("{e:#}"), "cannot read branch"),
            }
        }
        let mut deleted = 0;
        for branch in branches.iter().filter(|b| !live.contains(*b)) {
            self.vcs.delete_branch(&repo, branch, true)?;
            tracing::debug!(branch = %branch, "stale branch deleted");
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Observe every raider and classify it against the configured threshold.
    pub fn detect_stale(&self) -> anyhow::Result<Vec<StaleInfo>> {
        self.detect_stale_with(self.settings.stale_threshold)
    }

    pub fn detect_stale_with(&self, threshold: u32) -> anyhow::Result<Vec<StaleInfo>> {
        let upstream = format!("origin/{}", self.warband.default_branch());
        let store = self.store();
        let mut infos = Vec::new();
        for name in pool::existing_raiders(&self.warband.raiders_dir())? {
            let clone = self.clone_path(&name);
            let has_session = self.host().has_session(&self.session_name(&name))?;
            let behind = self.vcs.commits_behind(&clone, &upstream).unwrap_or_else(|e| {
                tracing::warn!(raider = %name, error = %format!("{e:#}"), "cannot count commits behind");
                0
            });
            let uncommitted = self.vcs.status(&clone).map(|s| s.uncommitted).unwrap_or(false);
            let state = agent::agent_fields(store.as_ref(), &self.agent_id(&name))?
                .map(|f| f.agent_state.unwrap_or(AgentState::Running));
            infos.push(StaleInfo::evaluate(&name, has_session, behind, uncommitted, state, threshold));
        }
        Ok(infos)
    }
}
