//! `tmux` implementation of [`SessionHost`].

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use super::{SessionHost, Theme};
use crate::error::HordeError;
use crate::subprocess::{RunOutput, Tool};

const TMUX: &str = "tmux";
const TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, Default)]
pub struct Tmux;

fn tmux(args: &[&str]) -> Tool {
    Tool::new(TMUX).args(args).timeout(TIMEOUT)
}

/// Exact-match target so `gt-horde-toast` never matches `gt-horde-toast2`.
fn exact(name: &str) -> String {
    format!("={name}")
}

/// "no server running" just means there are no sessions.
fn no_server(output: &RunOutput) -> bool {
    output.stderr.contains("no server running") || output.stderr.contains("error connecting to")
}

fn failed(output: &RunOutput) -> anyhow::Error {
    HordeError::ToolFailed {
        tool: TMUX.to_string(),
        code: output.exit_code,
        message: output.stderr.trim().to_string(),
    }
    .into()
}

fn pane_died_command(name: &str, agent_id: &str, actor: &str) -> String {
    format!(
        "run-shell -b \"hd drums send warchief/ --from {actor} -s 'SESSION_DIED {agent_id}' -m 'pane of session {name} exited'\""
    )
}

impl Tmux {
    fn current_command(&self, name: &str) -> anyhow::Result<String> {
        let output = tmux(&["display-message", "-p", "-t", &exact(name), "#{pane_current_command}"]).run_ok()?;
        Ok(output.stdout.trim().to_string())
    }
}

impl SessionHost for Tmux {
    fn new_session_with_command(&self, name: &str, work_dir: &Path, command: &str) -> anyhow::Result<()> {
        let dir = work_dir.to_string_lossy();
        tmux(&["new-session", "-d", "-s", name, "-c", &dir, command]).run_ok()?;
        Ok(())
    }

    fn has_session(&self, name: &str) -> anyhow::Result<bool> {
        let output = tmux(&["has-session", "-t", &exact(name)]).run()?;
        Ok(output.success())
    }

    fn kill_session(&self, name: &str) -> anyhow::Result<()> {
        let output = tmux(&["kill-session", "-t", &exact(name)]).run()?;
        if output.success() || no_server(&output) || output.stderr.contains("can't find session") {
            return Ok(());
        }
        Err(failed(&output))
    }

    fn list_sessions(&self) -> anyhow::Result<Vec<String>> {
        let output = tmux(&["list-sessions", "-F", "#{session_name}"]).run()?;
        if !output.success() {
            if no_server(&output) {
                return Ok(Vec::new());
            }
            return Err(failed(&output));
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn set_environment(&self, name: &str, key: &str, value: &str) -> anyhow::Result<()> {
        tmux(&["set-environment", "-t", &exact(name), key, value]).run_ok()?;
        Ok(())
    }

    fn capture_pane(&self, name: &str, lines: usize) -> anyhow::Result<String> {
        let start = format!("-{lines}");
        let output = tmux(&["capture-pane", "-p", "-t", &exact(name), "-S", &start]).run_ok()?;
        Ok(output.stdout)
    }

    fn send_keys_debounced(&self, name: &str, message: &str, debounce: Duration) -> anyhow::Result<()> {
        let target = exact(name);
        tmux(&["send-keys", "-t", &target, "-l", message]).run_ok()?;
        thread::sleep(debounce);
        tmux(&["send-keys", "-t", &target, "Enter"]).run_ok()?;
        Ok(())
    }

    fn send_key(&self, name: &str, key: &str) -> anyhow::Result<()> {
        tmux(&["send-keys", "-t", &exact(name), key]).run_ok()?;
        Ok(())
    }

    fn configure_theme(&self, name: &str, theme: &Theme) -> anyhow::Result<()> {
        let target = exact(name);
        let style = format!("bg={},fg={}", theme.bg, theme.fg);
        tmux(&["set-option", "-t", &target, "status-style", &style]).run_ok()?;
        let left = format!(" {name} ");
        tmux(&["set-option", "-t", &target, "status-left", &left]).run_ok()?;
        tmux(&["set-option", "-t", &target, "status-left-length", "40"]).run_ok()?;
        Ok(())
    }

    fn wait_for_command(&self, name: &str, shells: &[&str], timeout: Duration) -> anyhow::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.current_command(name) {
                Ok(command) if !command.is_empty() && !shells.contains(&command.as_str()) => {
                    tracing::debug!(target: "horde::session", session = name, command, "agent process up");
                    return Ok(true);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(target: "horde::session", session = name, error = %e, "pane not readable yet"),
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn set_pane_died_hook(&self, name: &str, agent_id: &str, actor: &str) -> anyhow::Result<()> {
        let target = exact(name);
        tmux(&["set-option", "-t", &target, "remain-on-exit", "on"]).run_ok()?;
        let hook = pane_died_command(name, agent_id, actor);
        tmux(&["set-hook", "-t", &target, "pane-died", &hook]).run_ok()?;
        Ok(())
    }
}
