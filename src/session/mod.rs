//! Agent sessions hosted by a terminal multiplexer.

pub mod settings;
pub mod tmux;

#[cfg(test)]
pub mod fake;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{self, UserSettings};
use crate::error::HordeError;
use crate::fsutil;
use crate::telemetry::DEBUG_SESSION_ENV;
use crate::template::{self, AgentContext};

/// Prefix of every horde session name.
pub const SESSION_PREFIX: &str = "gt";

/// Process names that mean the agent has not started yet.
pub const SHELLS: &[&str] = &["bash", "zsh", "sh", "fish", "dash"];

const DEBUG_LOG_FILE: &str = "session-debug.log";

/// Status-line colors for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Theme {
    pub bg: String,
    pub fg: String,
}

const PALETTE: &[&str] = &[
    "colour24", "colour28", "colour54", "colour94", "colour88", "colour30", "colour58", "colour60",
];

/// Stable per-warband theme so sessions of one warband look alike.
pub fn theme_for(warband: &str) -> Theme {
    let hash = warband
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
    Theme {
        bg: PALETTE[hash as usize % PALETTE.len()].to_string(),
        fg: "colour255".to_string(),
    }
}

/// The multiplexer capability.
pub trait SessionHost {
    fn new_session_with_command(&self, name: &str, work_dir: &Path, command: &str) -> anyhow::Result<()>;
    fn has_session(&self, name: &str) -> anyhow::Result<bool>;
    fn kill_session(&self, name: &str) -> anyhow::Result<()>;
    fn list_sessions(&self) -> anyhow::Result<Vec<String>>;
    fn set_environment(&self, name: &str, key: &str, value: &str) -> anyhow::Result<()>;
    /// Last `lines` lines of the session's pane.
    fn capture_pane(&self, name: &str, lines: usize) -> anyhow::Result<String>;
    /// Type `message`, pause for `debounce`, then press Enter.
    fn send_keys_debounced(&self, name: &str, message: &str, debounce: Duration) -> anyhow::Result<()>;
    /// Press a single named key (`Enter`, `Down`, ...).
    fn send_key(&self, name: &str, key: &str) -> anyhow::Result<()>;
    fn configure_theme(&self, name: &str, theme: &Theme) -> anyhow::Result<()>;
    /// Wait until the pane runs something other than one of `shells`.
    /// Returns `Ok(false)` when `timeout` expires first.
    fn wait_for_command(&self, name: &str, shells: &[&str], timeout: Duration) -> anyhow::Result<bool>;
    /// Report the death of the pane to the warchief as `SESSION_DIED <agent_id>`,
    /// sent from `actor`.
    fn set_pane_died_hook(&self, name: &str, agent_id: &str, actor: &str) -> anyhow::Result<()>;
}

pub fn raider_session(warband: &str, name: &str) -> String {
    format!("{SESSION_PREFIX}-{warband}-{name}")
}

/// Witness or forge.
pub fn singleton_session(warband: &str, role: &str) -> String {
    format!("{SESSION_PREFIX}-{warband}-{role}")
}

pub fn clan_session(warband: &str, name: &str) -> String {
    format!("{SESSION_PREFIX}-{warband}-clan-{name}")
}

pub fn encampment_session(role: &str) -> String {
    format!("{SESSION_PREFIX}-{role}")
}

/// Single-quote `value` for a POSIX shell.
fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./:@=".contains(&b))
    {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// What to start and who it is.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub session: String,
    pub work_dir: PathBuf,
    pub agent: AgentContext,
    /// Id of the agent's identity record.
    pub agent_id: String,
    /// Address that sent the agent on its way, shown in the beacon.
    pub sender: String,
}

impl StartRequest {
    /// `ACTOR=<warband>/<role>/<name>`, or `<warband>/<role>` for singletons.
    pub fn actor(&self) -> String {
        let agent = &self.agent;
        match agent.name {
            Some(ref name) => format!("{}/{}/{}", agent.warband, agent.role, name),
            None => format!("{}/{}", agent.warband, agent.role),
        }
    }

    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let actor = self.actor();
        vec![
            ("AGENT_ROLE", self.agent.role.clone()),
            ("WARBAND", self.agent.warband.clone()),
            ("AGENT_NAME", self.agent.name.clone().unwrap_or_default()),
            ("ACTOR", actor.clone()),
            (crate::store::ACTOR_ENV, actor),
        ]
    }

    /// Inline exports followed by `exec` of the agent.
    pub fn startup_command(&self, agent_command: &str) -> String {
        let exports: Vec<String> = self
            .env_vars()
            .iter()
            .map(|(k, v)| format!("{k}={}", shell_quote(v)))
            .collect();
        format!("export {} && exec {agent_command}", exports.join(" "))
    }
}

/// Starts and stops agent sessions on a [`SessionHost`].
pub struct SessionManager<'a> {
    host: &'a dyn SessionHost,
    settings: UserSettings,
}

impl<'a> SessionManager<'a> {
    pub fn new(host: &'a dyn SessionHost, settings: UserSettings) -> Self {
        Self { host, settings }
    }

    pub fn host(&self) -> &'a dyn SessionHost {
        self.host
    }

    /// Create the session and bring the agent up.
    ///
    /// Refuses when the session already exists. Everything after the session
    /// is created is best-effort: failures are logged, never returned.
    pub fn start(&self, req: &StartRequest) -> anyhow::Result<()> {
        let name = req.session.as_str();
        if self.host.has_session(name)? {
            return Err(HordeError::Exists(format!("session {name}")).into());
        }

        let settings_dir = req.work_dir.parent().unwrap_or(&req.work_dir);
        settings::ensure_role_settings(settings_dir, &req.agent.role)?;

        let command = req.startup_command(&self.settings.agent_command);
        self.host
            .new_session_with_command(name, &req.work_dir, &command)?;
        tracing::info!(session = name, role = %req.agent.role, "session created");
        debug_log(name, "created", &command);

        let actor = req.actor();
        self.best_effort(name, "theme", || {
            self.host.configure_theme(name, &theme_for(&req.agent.warband))
        });
        self.best_effort(name, "pane-died hook", || {
            self.host.set_pane_died_hook(name, &req.agent_id, &actor)
        });
        for (key, value) in req.env_vars() {
            self.best_effort(name, "set environment", || {
                self.host.set_environment(name, key, &value)
            });
        }

        let timeout = Duration::from_secs(self.settings.ready_timeout_secs);
        match self.host.wait_for_command(name, SHELLS, timeout) {
            Ok(true) => debug_log(name, "ready", ""),
            Ok(false) => {
                tracing::warn!(session = name, timeout_secs = timeout.as_secs(), "agent not ready before timeout");
                debug_log(name, "ready", "timed out");
            }
            Err(e) => tracing::warn!(session = name, error = %format!("{e:#}"), "waiting for agent failed"),
        }

        self.best_effort(name, "dismiss dialog", || self.dismiss_permission_dialog(name));

        let debounce = Duration::from_millis(self.settings.debounce_ms);
        self.best_effort(name, "beacon", || {
            let beacon = template::render_beacon(&req.agent, &req.sender)?;
            self.host.send_keys_debounced(name, &beacon, debounce)
        });
        self.best_effort(name, "propulsion", || {
            let nudge = template::render_propulsion(&req.agent)?;
            self.host.send_keys_debounced(name, &nudge, debounce)
        });
        Ok(())
    }

    /// Kill the session if it exists. Returns whether one was killed.
    pub fn stop(&self, session: &str) -> anyhow::Result<bool> {
        if !self.host.has_session(session)? {
            return Ok(false);
        }
        self.host.kill_session(session)?;
        tracing::info!(session, "session stopped");
        Ok(true)
    }

    pub fn is_running(&self, session: &str) -> anyhow::Result<bool> {
        self.host.has_session(session)
    }

    /// Accept a workspace-trust or bypass-permissions prompt if one is showing.
    fn dismiss_permission_dialog(&self, name: &str) -> anyhow::Result<()> {
        let pane = self.host.capture_pane(name, 30)?;
        if pane.contains("Bypass Permissions mode") && pane.contains("Yes, I accept") {
            self.host.send_key(name, "Down")?;
            self.host.send_key(name, "Enter")?;
            debug_log(name, "dialog", "accepted bypass permissions");
        } else if pane.contains("Do you trust the files") {
            self.host.send_key(name, "Enter")?;
            debug_log(name, "dialog", "trusted workspace");
        }
        Ok(())
    }

    fn best_effort(&self, session: &str, step: &str, f: impl FnOnce() -> anyhow::Result<()>) {
        match f() {
            Ok(()) => debug_log(session, step, "ok"),
            Err(e) => {
                tracing::warn!(session, step, error = %format!("{e:#}"), "session setup step failed");
                debug_log(session, step, &format!("{e:#}"));
            }
        }
    }
}

/// Append a line to the session debug log when `HD_DEBUG_SESSION` is set.
fn debug_log(session: &str, step: &str, detail: &str) {
    tracing::debug!(target: "horde::session", session, step, detail);
    if std::env::var_os(DEBUG_SESSION_ENV).is_none() {
        return;
    }
    let Some(dir) = config::state_dir() else {
        return;
    };
    let line = format!(
        "{} {session} {step} {detail}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ")
    );
    if let Err(e) = fsutil::append_line(&dir.join(DEBUG_LOG_FILE), &line) {
        tracing::debug!(error = %e, "session debug log unavailable");
    }
}
