//! In-memory session host for unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{SessionHost, Theme};
use crate::error::HordeError;

#[derive(Debug, Default)]
struct Session {
    work_dir: PathBuf,
    command: String,
    env: BTreeMap<String, String>,
    keys: Vec<String>,
    pressed: Vec<String>,
    hook: Option<String>,
}

#[derive(Debug)]
struct State {
    sessions: BTreeMap<String, Session>,
    killed: Vec<String>,
    fail: BTreeSet<&'static str>,
    ready: bool,
    pane: String,
}

#[derive(Debug)]
pub struct FakeHost {
    state: Mutex<State>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                sessions: BTreeMap::new(),
                killed: Vec::new(),
                fail: BTreeSet::new(),
                ready: true,
                pane: String::new(),
            }),
        }
    }
}

impl FakeHost {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn fail_on(&self, op: &'static str) {
        self.lock().fail.insert(op);
    }

    pub fn set_ready(&self, ready: bool) {
        self.lock().ready = ready;
    }

    /// Text every `capture_pane` returns.
    pub fn set_pane(&self, text: &str) {
        self.lock().pane = text.to_string();
    }

    pub fn sent_keys(&self, name: &str) -> Vec<String> {
        self.lock().sessions.get(name).map(|s| s.keys.clone()).unwrap_or_default()
    }

    pub fn pressed(&self, name: &str) -> Vec<String> {
        self.lock().sessions.get(name).map(|s| s.pressed.clone()).unwrap_or_default()
    }

    pub fn env(&self, name: &str, key: &str) -> Option<String> {
        self.lock().sessions.get(name)?.env.get(key).cloned()
    }

    pub fn command(&self, name: &str) -> Option<String> {
        self.lock().sessions.get(name).map(|s| s.command.clone())
    }

    pub fn work_dir(&self, name: &str) -> Option<PathBuf> {
        self.lock().sessions.get(name).map(|s| s.work_dir.clone())
    }

    pub fn hook(&self, name: &str) -> Option<String> {
        self.lock().sessions.get(name)?.hook.clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.lock().killed.clone()
    }

    fn check(state: &State, op: &'static str) -> anyhow::Result<()> {
        if state.fail.contains(op) {
            return Err(HordeError::Unavailable(format!("tmux {op} failed")).into());
        }
        Ok(())
    }

    fn with_session<R>(
        &self,
        op: &'static str,
        name: &str,
        f: impl FnOnce(&mut Session) -> R,
    ) -> anyhow::Result<R> {
        let mut state = self.lock();
        Self::check(&state, op)?;
        let session = state
            .sessions
            .get_mut(name)
            .ok_or_else(|| HordeError::NotFound(format!("session {name}")))?;
        Ok(f(session))
    }
}

impl SessionHost for FakeHost {
    fn new_session_with_command(&self, name: &str, work_dir: &Path, command: &str) -> anyhow::Result<()> {
        let mut state = self.lock();
        Self::check(&state, "new_session")?;
        if state.sessions.contains_key(name) {
            return Err(HordeError::Exists(format!("session {name}")).into());
        }
        state.sessions.insert(
            name.to_string(),
            Session {
                work_dir: work_dir.to_path_buf(),
                command: command.to_string(),
                ..Default::default()
            },
        );
        Ok(())
    }

    fn has_session(&self, name: &str) -> anyhow::Result<bool> {
        let state = self.lock();
        Self::check(&state, "has_session")?;
        Ok(state.sessions.contains_key(name))
    }

    fn kill_session(&self, name: &str) -> anyhow::Result<()> {
        let mut state = self.lock();
        Self::check(&state, "kill_session")?;
        if state.sessions.remove(name).is_some() {
            state.killed.push(name.to_string());
        }
        Ok(())
    }

    fn list_sessions(&self) -> anyhow::Result<Vec<String>> {
        let state = self.lock();
        Self::check(&state, "list_sessions")?;
        Ok(state.sessions.keys().cloned().collect())
    }

    fn set_environment(&self, name: &str, key: &str, value: &str) -> anyhow::Result<()> {
        self.with_session("set_environment", name, |s| {
            s.env.insert(key.to_string(), value.to_string());
        })
    }

    fn capture_pane(&self, name: &str, _lines: usize) -> anyhow::Result<String> {
        let pane = self.lock().pane.clone();
        self.with_session("capture_pane", name, |_| pane)
    }

    fn send_keys_debounced(&self, name: &str, message: &str, _debounce: Duration) -> anyhow::Result<()> {
        self.with_session("send_keys", name, |s| s.keys.push(message.to_string()))
    }

    fn send_key(&self, name: &str, key: &str) -> anyhow::Result<()> {
        self.with_session("send_key", name, |s| s.pressed.push(key.to_string()))
    }

    fn configure_theme(&self, name: &str, _theme: &Theme) -> anyhow::Result<()> {
        self.with_session("configure_theme", name, |_| ())
    }

    fn wait_for_command(&self, name: &str, _shells: &[&str], _timeout: Duration) -> anyhow::Result<bool> {
        let ready = self.lock().ready;
        self.with_session("wait_for_command", name, |_| ready)
    }

    fn set_pane_died_hook(&self, name: &str, agent_id: &str, _actor: &str) -> anyhow::Result<()> {
        self.with_session("set_pane_died_hook", name, |s| s.hook = Some(agent_id.to_string()))
    }
}
