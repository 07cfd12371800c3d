pub mod clan;
pub mod drums;
pub mod init;
pub mod raider;
pub mod rally;
pub mod warband;
pub mod witness;

use std::io::IsTerminal;

use serde::Serialize;

use crate::config::UserSettings;
use crate::encampment::Encampment;
use crate::error::HordeError;
use crate::session::tmux::Tmux;
use crate::store::ACTOR_ENV;
use crate::store::relics::RelicsProvider;
use crate::vcs::git::Git;
use crate::warband::Warband;
use crate::workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Text,
    Json,
}

/// Explicit format, else pretty on a terminal and text when piped.
pub fn resolve_format(format: Option<OutputFormat>) -> OutputFormat {
    format.unwrap_or_else(|| {
        if std::io::stdout().is_terminal() {
            OutputFormat::Pretty
        } else {
            OutputFormat::Text
        }
    })
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Production collaborators for one invocation.
pub struct Runtime {
    pub encampment: Encampment,
    pub vcs: Git,
    pub stores: RelicsProvider,
    pub host: Tmux,
    pub settings: UserSettings,
}

impl Runtime {
    /// The encampment around the current directory, with user settings.
    pub fn discover() -> anyhow::Result<Self> {
        Ok(Self {
            encampment: Encampment::discover()?,
            vcs: Git,
            stores: RelicsProvider {
                actor: std::env::var(ACTOR_ENV).ok().filter(|a| !a.is_empty()),
            },
            host: Tmux,
            settings: UserSettings::load()?,
        })
    }

    /// `name`, or the warband containing the current directory.
    pub fn warband(&self, name: Option<&str>) -> anyhow::Result<Warband> {
        if let Some(name) = name {
            return Warband::load(&self.encampment, name);
        }
        let cwd = std::env::current_dir()?;
        let warband = workspace::locate(self.encampment.root(), &cwd)
            .and_then(|loc| loc.warband)
            .or_else(|| std::env::var("WARBAND").ok().filter(|w| !w.is_empty()))
            .ok_or_else(|| {
                HordeError::Validation(
                    "no warband given and the current directory is not inside one; pass --warband".into(),
                )
            })?;
        Warband::load(&self.encampment, &warband)
    }
}

/// The caller's drums address: explicit, then `ACTOR`/`BD_ACTOR`, then the
/// current directory, then the warchief.
pub fn identity(explicit: Option<&str>, encampment: &Encampment) -> String {
    if let Some(id) = explicit {
        return crate::drums::address::normalize(id);
    }
    for var in ["ACTOR", ACTOR_ENV] {
        if let Ok(actor) = std::env::var(var)
            && !actor.trim().is_empty()
        {
            return crate::drums::address::normalize(&actor);
        }
    }
    let located = std::env::current_dir()
        .ok()
        .and_then(|cwd| workspace::locate(encampment.root(), &cwd));
    match located {
        Some(loc) => match (loc.warband, loc.role.as_str(), loc.name) {
            (Some(wb), "raider", Some(name)) => format!("{wb}/raiders/{name}"),
            (Some(wb), "clan", Some(name)) => format!("{wb}/clan/{name}"),
            (Some(wb), role, _) => format!("{wb}/{role}"),
            (None, role, _) => format!("{role}/"),
        },
        None => "warchief/".to_string(),
    }
}
