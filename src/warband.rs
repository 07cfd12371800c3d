//! Warbands: one managed repository, its shared bare repo and agent roots.
//!
//! ```text
//! <warband>/
//!   .repo.git/          bare repo shared by forge and every raider worktree
//!   warchief/project/   regular clone (never sees raider branches)
//!   forge/project/      worktree of .repo.git on the default branch
//!   witness/            no clone
//!   raiders/  clan/     agent roots
//!   .store/             local store, or a redirect to warchief/project/.store
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use chrono::Utc;

use crate::config::{RegistryEntry, StoreSettings, WarbandConfig, WarbandRegistry};
use crate::encampment::Encampment;
use crate::error::HordeError;
use crate::fsutil::CleanupGuard;
use crate::session::settings;
use crate::store::fields::{AgentFields, AgentState, QueueFields, WarbandFields};
use crate::store::routes::Routes;
use crate::store::{CreateFields, IssueStore, STORE_DIR_NAME, StoreProvider, agent, ids, redirect};
use crate::template;
use crate::vcs::Vcs;

pub const BARE_REPO: &str = ".repo.git";
pub const RUNTIME_DIR: &str = ".runtime";
pub const WARCHIEF_CLONE: &str = "warchief/project";
pub const FORGE_WORKTREE: &str = "forge/project";
pub const WITNESS_DIR: &str = "witness";
pub const RAIDERS_DIR: &str = "raiders";
pub const CLAN_DIR: &str = "clan";
pub const PLUGINS_DIR: &str = "plugins";

/// Suffixes that split a single-word name into a compound (`gastown` → `gas`+`town`).
const COMPOUND_SUFFIXES: &[&str] = &["town", "ville", "port", "place", "land", "field", "wood", "ford"];
const GITIGNORE_ENTRIES: &[&str] = &["plugins/", ".repo.git/"];

/// A loaded warband.
#[derive(Debug, Clone)]
pub struct Warband {
    pub name: String,
    pub path: PathBuf,
    pub config: WarbandConfig,
}

impl Warband {
    pub fn load(encampment: &Encampment, name: &str) -> anyhow::Result<Self> {
        let path = encampment.warband_dir(name);
        let config = WarbandConfig::load(&path)?;
        Ok(Self {
            name: name.to_string(),
            path,
            config,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.config.store.prefix
    }

    pub fn default_branch(&self) -> &str {
        &self.config.default_branch
    }

    pub fn bare_repo(&self) -> PathBuf {
        self.path.join(BARE_REPO)
    }

    pub fn warchief_clone(&self) -> PathBuf {
        self.path.join(WARCHIEF_CLONE)
    }

    pub fn forge_worktree(&self) -> PathBuf {
        self.path.join(FORGE_WORKTREE)
    }

    pub fn witness_dir(&self) -> PathBuf {
        self.path.join(WITNESS_DIR)
    }

    pub fn raiders_dir(&self) -> PathBuf {
        self.path.join(RAIDERS_DIR)
    }

    pub fn clan_dir(&self) -> PathBuf {
        self.path.join(CLAN_DIR)
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.path.join(RUNTIME_DIR)
    }

    /// Repository raider worktrees hang off: the bare repo, else the warchief clone.
    pub fn repo_base(&self) -> PathBuf {
        let bare = self.bare_repo();
        if bare.is_dir() { bare } else { self.warchief_clone() }
    }

    /// Effective store directory after redirects.
    pub fn store_dir(&self) -> PathBuf {
        redirect::resolve_store_dir(&self.path)
    }
}

/// Inputs to [`WarbandManager::add`].
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    pub name: String,
    pub git_url: String,
    pub local_repo: Option<PathBuf>,
    pub prefix: Option<String>,
}

/// Replace characters a warband name may not contain.
pub fn sanitize_warband_name(name: &str) -> String {
    name.trim().replace(['-', '.', ' ', '/'], "_")
}

pub fn validate_warband_name(name: &str) -> anyhow::Result<()> {
    if name.trim().is_empty() {
        return Err(HordeError::Validation("warband name is empty".into()).into());
    }
    if name.contains(['-', '.', ' ', '/']) {
        return Err(HordeError::Validation(format!(
            "warband name {name:?} may not contain '-', '.', '/' or spaces; try {:?}",
            sanitize_warband_name(name)
        ))
        .into());
    }
    Ok(())
}

// The pattern is a literal; it either compiles on every run or on none.
#[allow(clippy::expect_used)]
static PREFIX_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,19}$").expect("prefix pattern compiles"));

pub fn validate_prefix(prefix: &str) -> anyhow::Result<()> {
    if PREFIX_RE.is_match(prefix) {
        Ok(())
    } else {
        Err(HordeError::Validation(format!(
            "invalid store prefix {prefix:?}: must start with a letter and be at most 20 letters, digits or '-'"
        ))
        .into())
    }
}

/// Split `camelCase` words.
fn split_camel(word: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    for ch in word.chars() {
        if ch.is_uppercase() && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn compound_split(word: &str) -> Vec<String> {
    let lower = word.to_lowercase();
    for suffix in COMPOUND_SUFFIXES {
        if let Some(stem) = lower.strip_suffix(suffix)
            && !stem.is_empty()
        {
            return vec![stem.to_string(), (*suffix).to_string()];
        }
    }
    split_camel(word)
}

/// Store prefix derived from a warband name.
///
/// `gastown` → `gt`, `my-project` → `mp`, `foo` → `foo`, `backend` → `ba`.
pub fn derive_prefix(name: &str) -> String {
    let mut parts: Vec<String> = name
        .split(['-', '_'])
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if parts.len() == 1 {
        parts = compound_split(&parts[0]);
    }
    let prefix: String = if parts.len() >= 2 {
        parts.iter().filter_map(|p| p.chars().next()).collect()
    } else if name.chars().count() <= 3 {
        name.to_string()
    } else {
        name.chars().take(2).collect()
    };
    prefix.to_lowercase()
}

fn strip_quotes(value: &str) -> &str {
    value.trim().trim_matches(|c| c == '"' || c == '\'')
}

/// Prefix of a store checked into the repository: from its `config.yaml`, else
/// from the first issue id in `issues.jsonl`.
pub fn detect_tracked_prefix(store_dir: &Path) -> Option<String> {
    if let Ok(config) = fs::read_to_string(store_dir.join("config.yaml")) {
        for line in config.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            if matches!(key.trim(), "issue-prefix" | "issue_prefix" | "prefix") {
                let value = strip_quotes(value).trim_end_matches('-');
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    let issues = fs::read_to_string(store_dir.join("issues.jsonl")).ok()?;
    issues.lines().find_map(|line| {
        let value: serde_json::Value = serde_json::from_str(line).ok()?;
        let id = value.get("id")?.as_str()?;
        ids::id_prefix(id).map(str::to_string)
    })
}

fn ensure_gitignore(warband_dir: &Path) -> anyhow::Result<()> {
    let path = warband_dir.join(".gitignore");
    let existing = fs::read_to_string(&path).unwrap_or_default();
    let missing: Vec<&str> = GITIGNORE_ENTRIES
        .iter()
        .copied()
        .filter(|entry| !existing.lines().any(|l| l.trim() == *entry))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    let mut contents = existing;
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    for entry in missing {
        contents.push_str(entry);
        contents.push('\n');
    }
    fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))
}

fn create_dir(path: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(path).with_context(|| format!("creating {}", path.display()))
}

/// Creates, lists and unregisters warbands.
pub struct WarbandManager<'a> {
    encampment: &'a Encampment,
    vcs: &'a dyn Vcs,
    stores: &'a dyn StoreProvider,
}

impl<'a> WarbandManager<'a> {
    pub fn new(encampment: &'a Encampment, vcs: &'a dyn Vcs, stores: &'a dyn StoreProvider) -> Self {
        Self {
            encampment,
            vcs,
            stores,
        }
    }

    /// Create a warband. On any error the warband directory is removed.
    pub fn add(&self, opts: &AddOptions) -> anyhow::Result<Warband> {
        validate_warband_name(&opts.name)?;
        if let Some(ref prefix) = opts.prefix {
            validate_prefix(prefix)?;
        }
        let name = opts.name.as_str();
        let root = self.encampment.root();
        let warband_dir = self.encampment.warband_dir(name);
        let mut registry = self.encampment.registry()?;
        let previous_routes = self.encampment.routes()?;
        if registry.warbands.contains_key(name) || warband_dir.exists() {
            return Err(HordeError::Exists(format!("warband {name}")).into());
        }
        let mut prefix = match opts.prefix {
            Some(ref p) => p.clone(),
            None => derive_prefix(name),
        };

        create_dir(&warband_dir)?;
        let guard = CleanupGuard::new(&warband_dir);
        tracing::info!(warband = name, url = %opts.git_url, "creating warband");

        let reference = self.usable_reference(opts);
        let bare = warband_dir.join(BARE_REPO);
        self.vcs
            .clone_bare(&opts.git_url, &bare, reference.as_deref())
            .context("cloning shared bare repo")?;
        let default_branch = self.vcs.default_branch(&bare)?;

        let warchief = warband_dir.join(WARCHIEF_CLONE);
        if let Some(parent) = warchief.parent() {
            create_dir(parent)?;
        }
        self.vcs
            .clone_repo(&opts.git_url, &warchief, reference.as_deref())
            .context("cloning warchief checkout")?;

        let tracked_store = warchief.join(STORE_DIR_NAME);
        let tracked = tracked_store.is_dir();
        if tracked && let Some(detected) = detect_tracked_prefix(&tracked_store) {
            if let Some(ref wanted) = opts.prefix
                && !wanted.trim_end_matches('-').eq_ignore_ascii_case(&detected)
            {
                return Err(HordeError::Validation(format!(
                    "--prefix {wanted} does not match the repository's tracked store prefix {detected}"
                ))
                .into());
            }
            prefix = detected;
        }
        validate_prefix(&prefix)?;

        let warband_store = warband_dir.join(STORE_DIR_NAME);
        if tracked {
            redirect::write_redirect(&warband_store, &format!("{WARCHIEF_CLONE}/{STORE_DIR_NAME}"))?;
        } else {
            create_dir(&warband_store)?;
            self.stores.open(&warband_store).init(&prefix)?;
        }

        let forge = warband_dir.join(FORGE_WORKTREE);
        if let Some(parent) = forge.parent() {
            create_dir(parent)?;
        }
        self.vcs
            .worktree_add_existing(&bare, &forge, &default_branch)
            .context("creating forge worktree")?;
        redirect::setup_redirect(root, &forge)?;

        create_dir(&warband_dir.join(RAIDERS_DIR))?;
        let clan = warband_dir.join(CLAN_DIR);
        create_dir(&clan)?;
        fs::write(clan.join("README.md"), template::render_clan_readme(name)?)
            .with_context(|| format!("writing {}", clan.join("README.md").display()))?;
        let witness = warband_dir.join(WITNESS_DIR);
        create_dir(&witness)?;
        settings::ensure_role_settings(&witness, "witness")?;
        create_dir(&warband_dir.join(RUNTIME_DIR))?;
        create_dir(&warband_dir.join(PLUGINS_DIR))?;
        ensure_gitignore(&warband_dir)?;

        let config = WarbandConfig {
            kind: "warband".to_string(),
            version: crate::config::CURRENT_VERSION,
            name: name.to_string(),
            git_url: opts.git_url.clone(),
            local_repo: opts.local_repo.as_ref().map(|p| p.display().to_string()),
            default_branch,
            created_at: Utc::now(),
            store: StoreSettings {
                prefix: prefix.clone(),
                sync_remote: None,
            },
        };
        config.save(&warband_dir)?;
        let warband = Warband {
            name: name.to_string(),
            path: warband_dir.clone(),
            config,
        };

        self.seed_records(&warband);

        registry.warbands.insert(
            name.to_string(),
            RegistryEntry {
                git_url: opts.git_url.clone(),
                local_repo: warband.config.local_repo.clone(),
                added_at: warband.config.created_at,
                store: warband.config.store.clone(),
            },
        );
        let mut routes = previous_routes.clone();
        let route_path = if tracked {
            format!("{name}/{WARCHIEF_CLONE}")
        } else {
            name.to_string()
        };
        routes.add(&prefix, &route_path);
        commit_registration(root, &registry, &routes, &previous_routes)?;

        guard.disarm();
        self.encampment.events().record(
            "warband.add",
            "warchief/",
            serde_json::json!({"warband": name, "prefix": prefix, "tracked_store": tracked}),
        );
        tracing::info!(warband = name, prefix = %prefix, "warband created");
        Ok(warband)
    }

    /// The local reference repo, when it exists and points at the same origin.
    fn usable_reference(&self, opts: &AddOptions) -> Option<PathBuf> {
        let local = opts.local_repo.as_ref()?;
        if !local.is_dir() {
            tracing::warn!(path = %local.display(), "local reference repo missing, cloning without it");
            return None;
        }
        match self.vcs.remote_url(local, "origin") {
            Ok(Some(ref url)) if url == &opts.git_url => Some(local.clone()),
            Ok(other) => {
                tracing::warn!(
                    path = %local.display(),
                    origin = ?other,
                    "local reference repo has a different origin, cloning without it"
                );
                None
            }
            Err(e) => {
                tracing::warn!(path = %local.display(), error = %format!("{e:#}"), "cannot inspect local reference repo");
                None
            }
        }
    }

    /// Witness and forge agent records, the warband identity and merge queue in
    /// the warband store, role definitions in the encampment store. Best-effort.
    fn seed_records(&self, warband: &Warband) {
        let store = self.stores.open(&warband.store_dir());
        let prefix = warband.prefix();
        for role in ["witness", "forge"] {
            let id = ids::warband_agent_id(prefix, &warband.name, role, None);
            let fields = AgentFields {
                role_type: role.to_string(),
                warband: warband.name.clone(),
                agent_state: Some(AgentState::Spawning),
                role_bead: Some(ids::role_bead_id(role)),
                ..Default::default()
            };
            let title = format!("{}/{role}", warband.name);
            if let Err(e) = agent::create_or_reopen_agent_bead(store.as_ref(), &id, &title, &fields) {
                tracing::warn!(warband = %warband.name, role, error = %format!("{e:#}"), "could not create agent record");
            }
        }
        if let Err(e) = create_identity_records(store.as_ref(), warband) {
            tracing::warn!(warband = %warband.name, error = %format!("{e:#}"), "could not create warband records");
        }

        let encampment_store = self.stores.open(&self.encampment.store_dir());
        if let Err(e) = agent::ensure_role_beads(encampment_store.as_ref()) {
            tracing::warn!(error = %format!("{e:#}"), "could not create role definitions");
        }
    }

    pub fn get(&self, name: &str) -> anyhow::Result<Warband> {
        if !self.encampment.registry()?.warbands.contains_key(name) {
            return Err(HordeError::NotFound(format!("warband {name}")).into());
        }
        Warband::load(self.encampment, name)
    }

    /// Registered warbands in name order. Entries whose config is unreadable are
    /// skipped with a warning.
    pub fn list(&self) -> anyhow::Result<Vec<Warband>> {
        let registry = self.encampment.registry()?;
        let mut warbands = Vec::new();
        for name in registry.warbands.keys() {
            match Warband::load(self.encampment, name) {
                Ok(w) => warbands.push(w),
                Err(e) => tracing::warn!(warband = %name, error = %format!("{e:#}"), "skipping unreadable warband"),
            }
        }
        Ok(warbands)
    }

    /// Unregister a warband. Nothing on disk is deleted.
    pub fn remove(&self, name: &str) -> anyhow::Result<()> {
        let mut registry = self.encampment.registry()?;
        if registry.warbands.remove(name).is_none() {
            return Err(HordeError::NotFound(format!("warband {name}")).into());
        }
        registry.save(self.encampment.root())?;
        self.encampment
            .events()
            .record("warband.remove", "warchief/", serde_json::json!({"warband": name}));
        tracing::info!(warband = name, "warband unregistered");
        Ok(())
    }
}

/// Persist the route, then the registry entry that makes the warband visible.
/// A failed registry write puts the previous routes back.
fn commit_registration(
    root: &Path,
    registry: &WarbandRegistry,
    routes: &Routes,
    previous_routes: &Routes,
) -> anyhow::Result<()> {
    routes.save(root)?;
    if let Err(e) = registry.save(root) {
        if let Err(back) = previous_routes.save(root) {
            tracing::warn!(error = %format!("{back:#}"), "could not restore routes after failed registration");
        }
        return Err(e);
    }
    Ok(())
}

fn create_identity_records(store: &dyn IssueStore, warband: &Warband) -> anyhow::Result<()> {
    let prefix = warband.prefix();
    let identity = ids::warband_identity_id(prefix, &warband.name);
    if store.find(&identity)?.is_none() {
        let fields = WarbandFields {
            repo: warband.config.git_url.clone(),
            prefix: prefix.to_string(),
            state: "active".to_string(),
        };
        store.create(&CreateFields {
            id: Some(identity),
            title: warband.name.clone(),
            description: fields.format(),
            issue_type: "warband".to_string(),
            labels: vec!["kind:warband".to_string()],
            ..Default::default()
        })?;
    }
    let queue = ids::queue_id(prefix, "merge");
    if store.find(&queue)?.is_none() {
        let fields = QueueFields {
            name: "merge".to_string(),
            ..Default::default()
        };
        store.create(&CreateFields {
            id: Some(queue),
            title: format!("{} merge queue", warband.name),
            description: fields.format(),
            issue_type: "queue".to_string(),
            labels: vec!["kind:queue".to_string()],
            ..Default::default()
        })?;
    }
    Ok(())
}
