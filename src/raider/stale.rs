//! Staleness: which raiders are safe to reap.

use serde::Serialize;

use crate::store::AgentState;

/// What an observation of one raider found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleInfo {
    pub name: String,
    pub has_active_session: bool,
    pub commits_behind: u32,
    pub has_uncommitted: bool,
    /// `None` when the agent record is missing.
    pub agent_state: Option<AgentState>,
    pub stale: bool,
    pub reason: String,
}

impl StaleInfo {
    /// Classify an observation against `threshold` commits behind.
    ///
    /// A live session or uncommitted work always keeps a raider. Otherwise it
    /// is stale when far behind, when its record is gone, or when it is not
    /// intentionally paused.
    pub fn evaluate(
        name: &str,
        has_active_session: bool,
        commits_behind: u32,
        has_uncommitted: bool,
        agent_state: Option<AgentState>,
        threshold: u32,
    ) -> Self {
        let (stale, reason) = if has_active_session {
            (false, "session is running".to_string())
        } else if has_uncommitted {
            (false, "worktree has uncommitted work".to_string())
        } else if commits_behind >= threshold {
            (true, format!("{commits_behind} commits behind (threshold {threshold})"))
        } else {
            match agent_state {
                None => (true, "agent record missing".to_string()),
                Some(state) if state.is_intentional_pause() => (false, format!("agent is {state}")),
                Some(state) => (true, format!("no session, agent is {state}")),
            }
        };
        Self {
            name: name.to_string(),
            has_active_session,
            commits_behind,
            has_uncommitted,
            agent_state,
            stale,
            reason,
        }
    }
}
