//! Per-role agent settings with session hooks.
//!
//! The file lands in the parent of an agent's worktree so the agent tool finds
//! it by directory traversal without the repository ever seeing it.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};

use crate::fsutil;

pub const SETTINGS_DIR: &str = ".claude";
pub const SETTINGS_FILE: &str = "settings.json";

/// Agent-tool hook event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    SessionStart,
    PreCompact,
    UserPromptSubmit,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::SessionStart => "SessionStart",
            HookEvent::PreCompact => "PreCompact",
            HookEvent::UserPromptSubmit => "UserPromptSubmit",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HookEntry {
    pub name: &'static str,
    pub command: &'static str,
    pub events: &'static [HookEvent],
}

/// Roles that run without a human at the keyboard.
const AUTONOMOUS_ROLES: &[&str] = &["raider", "witness", "forge", "shaman"];

impl HookEntry {
    pub fn is_eligible(&self, role: &str) -> bool {
        match self.name {
            "rally" | "drums-check" => true,
            "propulsion" => AUTONOMOUS_ROLES.contains(&role),
            _ => false,
        }
    }
}

pub struct HookRegistry;

impl HookRegistry {
    pub fn all() -> Vec<HookEntry> {
        vec![
            HookEntry {
                name: "rally",
                command: "hd rally",
                events: &[HookEvent::SessionStart, HookEvent::PreCompact],
            },
            HookEntry {
                name: "propulsion",
                command: "hd rally --propulsion",
                events: &[HookEvent::SessionStart],
            },
            HookEntry {
                name: "drums-check",
                command: "hd drums inbox --unread --quiet",
                events: &[HookEvent::UserPromptSubmit],
            },
        ]
    }

    pub fn eligible(role: &str) -> Vec<HookEntry> {
        Self::all()
            .into_iter()
            .filter(|entry| entry.is_eligible(role))
            .collect()
    }
}

/// Settings document for `role`.
pub fn role_settings(role: &str) -> Value {
    let mut hooks = Map::new();
    for event in [
        HookEvent::SessionStart,
        HookEvent::PreCompact,
        HookEvent::UserPromptSubmit,
    ] {
        let commands: Vec<Value> = HookRegistry::eligible(role)
            .iter()
            .filter(|entry| entry.events.contains(&event))
            .map(|entry| json!({"type": "command", "command": entry.command}))
            .collect();
        if !commands.is_empty() {
            hooks.insert(
                event.as_str().to_string(),
                json!([{"matcher": "", "hooks": commands}]),
            );
        }
    }
    json!({"hooks": hooks})
}

pub fn settings_path(dir: &Path) -> PathBuf {
    dir.join(SETTINGS_DIR).join(SETTINGS_FILE)
}

/// Write role settings under `dir` unless a file is already there.
/// Returns whether a file was written.
pub fn ensure_role_settings(dir: &Path, role: &str) -> anyhow::Result<bool> {
    let path = settings_path(dir);
    if path.exists() {
        return Ok(false);
    }
    fsutil::write_json(&path, &role_settings(role))?;
    tracing::debug!(path = %path.display(), role, "role settings written");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook_commands(settings: &Value, event: &str) -> Vec<String> {
        settings["hooks"][event][0]["hooks"]
            .as_array()
            .map(|hooks| {
                hooks
                    .iter()
                    .filter_map(|h| h["command"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn all_hooks_registered() {
        let hooks = HookRegistry::all();
        assert_eq!(hooks.len(), 3);
        assert!(hooks.iter().any(|h| h.name == "rally"));
        assert!(hooks.iter().any(|h| h.name == "propulsion"));
        assert!(hooks.iter().any(|h| h.name == "drums-check"));
    }

    #[test]
    fn autonomous_roles_get_propulsion() {
        let raider = role_settings("raider");
        assert_eq!(
            hook_commands(&raider, "SessionStart"),
            vec!["hd rally", "hd rally --propulsion"]
        );
        assert_eq!(hook_commands(&raider, "PreCompact"), vec!["hd rally"]);

        let clan = role_settings("clan");
        assert_eq!(hook_commands(&clan, "SessionStart"), vec!["hd rally"]);
        assert_eq!(
            hook_commands(&clan, "UserPromptSubmit"),
            vec!["hd drums inbox --unread --quiet"]
        );
    }

    #[test]
    fn ensure_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_role_settings(dir.path(), "raider").unwrap());
        std::fs::write(settings_path(dir.path()), "{}\n").unwrap();
        assert!(!ensure_role_settings(dir.path(), "raider").unwrap());
        assert_eq!(
            std::fs::read_to_string(settings_path(dir.path())).unwrap(),
            "{}\n"
        );
    }
}
