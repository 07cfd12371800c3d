use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HordeError;
use crate::fsutil;

/// File name constants.
pub const ENCAMPMENT_FILE: &str = "encampment.json";
pub const REGISTRY_FILE: &str = "warbands.json";
pub const WARBAND_CONFIG_FILE: &str = "config.json";
pub const SETTINGS_FILE: &str = "settings.json";

pub const CURRENT_VERSION: u32 = 1;
pub const DEFAULT_BRANCH: &str = "main";

/// `warchief/encampment.json`: the workspace marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncampmentConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u32,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl EncampmentConfig {
    pub fn new(name: &str) -> Self {
        Self {
            kind: "encampment".to_string(),
            version: CURRENT_VERSION,
            name: name.to_string(),
            created_at: Utc::now(),
            owner: std::env::var("USER").ok(),
        }
    }
}

/// `<warband>/config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarbandConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u32,
    pub name: String,
    pub git_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_repo: Option<String>,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    pub created_at: DateTime<Utc>,
    pub store: StoreSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_remote: Option<String>,
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

impl WarbandConfig {
    pub fn load(warband_dir: &Path) -> anyhow::Result<Self> {
        let path = warband_dir.join(WARBAND_CONFIG_FILE);
        if !path.exists() {
            return Err(HordeError::NotFound(format!("warband config {}", path.display())).into());
        }
        let config: Self = fsutil::read_json(&path)?;
        if config.version > CURRENT_VERSION {
            return Err(HordeError::Validation(format!(
                "{} has version {}, this hd understands up to {CURRENT_VERSION}",
                path.display(),
                config.version
            ))
            .into());
        }
        Ok(config)
    }

    pub fn save(&self, warband_dir: &Path) -> anyhow::Result<()> {
        fsutil::write_json(&warband_dir.join(WARBAND_CONFIG_FILE), self)
    }
}

/// `warchief/warbands.json`: which warbands this encampment manages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarbandRegistry {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default)]
    pub warbands: BTreeMap<String, RegistryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub git_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_repo: Option<String>,
    pub added_at: DateTime<Utc>,
    pub store: StoreSettings,
}

fn current_version() -> u32 {
    CURRENT_VERSION
}

impl WarbandRegistry {
    pub fn path(encampment_root: &Path) -> PathBuf {
        encampment_root.join("warchief").join(REGISTRY_FILE)
    }

    /// Load the registry; a missing file is an empty registry.
    pub fn load(encampment_root: &Path) -> anyhow::Result<Self> {
        let path = Self::path(encampment_root);
        if !path.exists() {
            return Ok(Self {
                version: CURRENT_VERSION,
                warbands: BTreeMap::new(),
            });
        }
        fsutil::read_json(&path)
    }

    pub fn save(&self, encampment_root: &Path) -> anyhow::Result<()> {
        fsutil::write_json(&Self::path(encampment_root), self)
    }
}

/// Per-user settings from `$XDG_CONFIG_HOME/horde/settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Command that launches the agent inside a session.
    #[serde(default = "default_agent_command")]
    pub agent_command: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Commits behind the default branch before an idle raider counts as stale.
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold: u32,
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_agent_command() -> String {
    "claude".into()
}

fn default_pool_size() -> u32 {
    50
}

fn default_stale_threshold() -> u32 {
    20
}

fn default_ready_timeout() -> u64 {
    30
}

fn default_debounce_ms() -> u64 {
    500
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            agent_command: default_agent_command(),
            pool_size: default_pool_size(),
            stale_threshold: default_stale_threshold(),
            ready_timeout_secs: default_ready_timeout(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl UserSettings {
    /// Load from the XDG config dir; a missing file yields defaults.
    pub fn load() -> anyhow::Result<Self> {
        match config_dir() {
            Some(dir) => Self::load_from(&dir.join(SETTINGS_FILE)),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&contents).map_err(|e| {
            HordeError::Validation(format!("invalid {}: {e}", path.display())).into()
        })
    }
}

/// `$XDG_CONFIG_HOME/horde`, falling back to the platform config dir.
pub fn config_dir() -> Option<PathBuf> {
    xdg_dir("XDG_CONFIG_HOME", dirs::config_dir)
}

/// `$XDG_STATE_HOME/horde`, falling back to the platform state dir.
pub fn state_dir() -> Option<PathBuf> {
    xdg_dir("XDG_STATE_HOME", || {
        dirs::state_dir().or_else(|| dirs::home_dir().map(|h| h.join(".local/state")))
    })
}

fn xdg_dir(var: &str, fallback: impl FnOnce() -> Option<PathBuf>) -> Option<PathBuf> {
    std::env::var_os(var)
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .or_else(fallback)
        .map(|base| base.join("horde"))
}

/// Global on/off switch. `HORDE_DISABLED` wins over `HORDE_ENABLED`.
pub fn horde_enabled() -> bool {
    enabled_from(
        std::env::var("HORDE_DISABLED").ok().as_deref(),
        std::env::var("HORDE_ENABLED").ok().as_deref(),
    )
}

fn enabled_from(disabled: Option<&str>, enabled: Option<&str>) -> bool {
    let truthy = |v: &str| {
        let v = v.trim();
        !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
    };
    if disabled.is_some_and(truthy) {
        return false;
    }
    match enabled {
        Some(v) if !v.trim().is_empty() => truthy(v),
        _ => true,
    }
}
