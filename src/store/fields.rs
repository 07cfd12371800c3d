//! Structured `key: value` headers carried in issue descriptions.
//!
//! Each record type owns a fixed key set. Parsing scans every line, collects the
//! keys it owns (case-insensitive, `-` and `_` interchangeable) and leaves the
//! rest as prose. Formatting emits one `key: value` line per field.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Issue;

/// Split a line into a normalized key and its trimmed value.
fn split_field(line: &str) -> Option<(String, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
        return None;
    }
    Some((key.to_ascii_lowercase().replace('-', "_"), value.trim()))
}

/// `""` and `null` both mean unset.
fn opt(value: &str) -> Option<String> {
    match value {
        "" | "null" => None,
        v => Some(v.to_string()),
    }
}

fn or_null(value: Option<&str>) -> &str {
    value.unwrap_or("null")
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value).filter(|v| !v.is_empty())
}

/// Lines of `description` whose key is in `keys`, and the remaining prose.
fn partition<'a>(description: &'a str, keys: &[&str]) -> (Vec<(String, &'a str)>, Vec<&'a str>) {
    let mut fields = Vec::new();
    let mut prose = Vec::new();
    for line in description.lines() {
        match split_field(line) {
            Some((key, value)) if keys.contains(&key.as_str()) => fields.push((key, value)),
            _ => prose.push(line),
        }
    }
    (fields, prose)
}

fn trim_blank_edges(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(s), Some(e)) => lines[s..=e].join("\n"),
        _ => String::new(),
    }
}

// --- Agent records ---

/// Lifecycle state an agent reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentState {
    Spawning,
    Running,
    Done,
    Stuck,
    AwaitingGate,
    Closed,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Spawning => "spawning",
            AgentState::Running => "running",
            AgentState::Done => "done",
            AgentState::Stuck => "stuck",
            AgentState::AwaitingGate => "awaiting-gate",
            AgentState::Closed => "closed",
        }
    }

    /// States that mean "paused on purpose"; such agents are never stale.
    pub fn is_intentional_pause(&self) -> bool {
        matches!(self, AgentState::Stuck | AgentState::AwaitingGate)
    }
}

impl FromStr for AgentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spawning" => Ok(AgentState::Spawning),
            "running" | "working" => Ok(AgentState::Running),
            "done" => Ok(AgentState::Done),
            "stuck" => Ok(AgentState::Stuck),
            "awaiting-gate" | "awaiting_gate" => Ok(AgentState::AwaitingGate),
            "closed" => Ok(AgentState::Closed),
            other => Err(format!("unknown agent state {other:?}")),
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an agent says is left in its worktree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStatus {
    Clean,
    HasUncommitted,
    HasStash,
    HasUnpushed,
    Unknown,
}

impl CleanupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupStatus::Clean => "clean",
            CleanupStatus::HasUncommitted => "has_uncommitted",
            CleanupStatus::HasStash => "has_stash",
            CleanupStatus::HasUnpushed => "has_unpushed",
            CleanupStatus::Unknown => "unknown",
        }
    }

    pub fn is_clean(&self) -> bool {
        *self == CleanupStatus::Clean
    }
}

impl FromStr for CleanupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "clean" => Ok(CleanupStatus::Clean),
            "has_uncommitted" | "uncommitted" => Ok(CleanupStatus::HasUncommitted),
            "has_stash" | "stash" => Ok(CleanupStatus::HasStash),
            "has_unpushed" | "unpushed" => Ok(CleanupStatus::HasUnpushed),
            "unknown" => Ok(CleanupStatus::Unknown),
            other => Err(format!("unknown cleanup status {other:?}")),
        }
    }
}

impl fmt::Display for CleanupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const AGENT_KEYS: &[&str] = &[
    "role_type",
    "warband",
    "agent_state",
    "cleanup_status",
    "banner_bead",
    "active_mr",
    "role_bead",
    "notification_level",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentFields {
    pub role_type: String,
    pub warband: String,
    pub agent_state: Option<AgentState>,
    pub cleanup_status: Option<CleanupStatus>,
    pub banner_bead: Option<String>,
    pub active_mr: Option<String>,
    pub role_bead: Option<String>,
    pub notification_level: Option<String>,
}

impl AgentFields {
    pub fn parse(description: &str) -> Self {
        let mut fields = AgentFields::default();
        for (key, value) in partition(description, AGENT_KEYS).0 {
            match key.as_str() {
                "role_type" => fields.role_type = opt(value).unwrap_or_default(),
                "warband" => fields.warband = opt(value).unwrap_or_default(),
                "agent_state" => fields.agent_state = opt(value).and_then(|v| v.parse().ok()),
                "cleanup_status" => {
                    fields.cleanup_status = opt(value).and_then(|v| v.parse().ok());
                }
                "banner_bead" => fields.banner_bead = opt(value),
                "active_mr" => fields.active_mr = opt(value),
                "role_bead" => fields.role_bead = opt(value),
                "notification_level" => fields.notification_level = opt(value),
                _ => {}
            }
        }
        fields
    }

    pub fn format(&self) -> String {
        [
            format!("role_type: {}", or_null(non_empty(&self.role_type))),
            format!("warband: {}", or_null(non_empty(&self.warband))),
            format!("agent_state: {}", or_null(self.agent_state.as_ref().map(AgentState::as_str))),
            format!(
                "cleanup_status: {}",
                or_null(self.cleanup_status.as_ref().map(CleanupStatus::as_str))
            ),
            format!("banner_bead: {}", or_null(self.banner_bead.as_deref())),
            format!("active_mr: {}", or_null(self.active_mr.as_deref())),
            format!("role_bead: {}", or_null(self.role_bead.as_deref())),
            format!("notification_level: {}", or_null(self.notification_level.as_deref())),
        ]
        .join("\n")
    }

    /// Effective cleanup status: absent means unknown.
    pub fn cleanup(&self) -> CleanupStatus {
        self.cleanup_status.unwrap_or(CleanupStatus::Unknown)
    }

    /// Keep the immutable identity, drop everything mutable.
    pub fn cleared(&self) -> Self {
        AgentFields {
            role_type: self.role_type.clone(),
            warband: self.warband.clone(),
            agent_state: Some(AgentState::Closed),
            ..Default::default()
        }
    }

    /// Replace the agent header of `description`, keeping prose after it.
    pub fn apply_to(&self, description: &str) -> String {
        let (_, prose) = partition(description, AGENT_KEYS);
        let prose = trim_blank_edges(&prose);
        if prose.is_empty() {
            self.format()
        } else {
            format!("{}\n\n{prose}", self.format())
        }
    }
}

// --- Merge request records ---

const MR_KEYS: &[&str] = &[
    "branch",
    "target",
    "source_issue",
    "worker",
    "warband",
    "merge_commit",
    "close_reason",
    "retry_count",
    "last_conflict_sha",
    "conflict_task_id",
    "raid_id",
    "raid_created_at",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MrFields {
    pub branch: Option<String>,
    pub target: Option<String>,
    pub source_issue: Option<String>,
    pub worker: Option<String>,
    pub warband: Option<String>,
    pub merge_commit: Option<String>,
    pub close_reason: Option<String>,
    pub retry_count: u32,
    pub last_conflict_sha: Option<String>,
    pub conflict_task_id: Option<String>,
    pub raid_id: Option<String>,
    pub raid_created_at: Option<String>,
}

impl MrFields {
    /// Parse the MR header out of a description. Returns `None` when no MR key is present.
    pub fn parse(description: &str) -> Option<Self> {
        let (found, _) = partition(description, MR_KEYS);
        if found.is_empty() {
            return None;
        }
        let mut fields = MrFields::default();
        for (key, value) in found {
            let slot = match key.as_str() {
                "branch" => &mut fields.branch,
                "target" => &mut fields.target,
                "source_issue" => &mut fields.source_issue,
                "worker" => &mut fields.worker,
                "warband" => &mut fields.warband,
                "merge_commit" => &mut fields.merge_commit,
                "close_reason" => &mut fields.close_reason,
                "last_conflict_sha" => &mut fields.last_conflict_sha,
                "conflict_task_id" => &mut fields.conflict_task_id,
                "raid_id" => &mut fields.raid_id,
                "raid_created_at" => &mut fields.raid_created_at,
                "retry_count" => {
                    fields.retry_count = value.parse().unwrap_or(0);
                    continue;
                }
                _ => continue,
            };
            *slot = opt(value);
        }
        Some(fields)
    }

    pub fn parse_issue(issue: &Issue) -> Option<Self> {
        Self::parse(&issue.description)
    }

    /// Only set fields are emitted, in canonical order.
    pub fn format(&self) -> String {
        let retry = (self.retry_count > 0).then(|| self.retry_count.to_string());
        [
            ("branch", self.branch.as_ref()),
            ("target", self.target.as_ref()),
            ("source_issue", self.source_issue.as_ref()),
            ("worker", self.worker.as_ref()),
            ("warband", self.warband.as_ref()),
            ("merge_commit", self.merge_commit.as_ref()),
            ("close_reason", self.close_reason.as_ref()),
            ("retry_count", retry.as_ref()),
            ("last_conflict_sha", self.last_conflict_sha.as_ref()),
            ("conflict_task_id", self.conflict_task_id.as_ref()),
            ("raid_id", self.raid_id.as_ref()),
            ("raid_created_at", self.raid_created_at.as_ref()),
        ]
        .iter()
        .filter_map(|(k, v)| v.map(|v| format!("{k}: {v}")))
        .collect::<Vec<_>>()
        .join("\n")
    }

    pub fn is_empty(&self) -> bool {
        *self == MrFields::default()
    }
}

/// Rewrite a description's MR header.
///
/// `None` leaves the description untouched. `Some(fields)` replaces every MR line
/// with the formatted header (an empty header removes them) and keeps the prose.
pub fn set_mr_fields(description: &str, fields: Option<&MrFields>) -> String {
    let Some(fields) = fields else {
        return description.to_string();
    };
    let (_, prose) = partition(description, MR_KEYS);
    let prose = trim_blank_edges(&prose);
    let header = fields.format();
    match (header.is_empty(), prose.is_empty()) {
        (true, _) => prose,
        (false, true) => header,
        (false, false) => format!("{header}\n\n{prose}"),
    }
}

// --- Attachment (work attached to a banner bead) ---

const ATTACHMENT_KEYS: &[&str] = &["attached_ritual", "attached_at", "attached_args", "dispatched_by"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentFields {
    pub attached_ritual: Option<String>,
    pub attached_at: Option<String>,
    pub attached_args: Option<String>,
    pub dispatched_by: Option<String>,
}

impl AttachmentFields {
    pub fn parse(description: &str) -> Option<Self> {
        let (found, _) = partition(description, ATTACHMENT_KEYS);
        if found.is_empty() {
            return None;
        }
        let mut fields = AttachmentFields::default();
        for (key, value) in found {
            match key.as_str() {
                "attached_ritual" => fields.attached_ritual = opt(value),
                "attached_at" => fields.attached_at = opt(value),
                "attached_args" => fields.attached_args = opt(value),
                "dispatched_by" => fields.dispatched_by = opt(value),
                _ => {}
            }
        }
        Some(fields)
    }

    pub fn format(&self) -> String {
        [
            ("attached_ritual", &self.attached_ritual),
            ("attached_at", &self.attached_at),
            ("attached_args", &self.attached_args),
            ("dispatched_by", &self.dispatched_by),
        ]
        .iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| format!("{k}: {v}")))
        .collect::<Vec<_>>()
        .join("\n")
    }

    /// Replace the attachment header of `description`, keeping prose.
    pub fn apply_to(&self, description: &str) -> String {
        let (_, prose) = partition(description, ATTACHMENT_KEYS);
        let prose = trim_blank_edges(&prose);
        let header = self.format();
        match (header.is_empty(), prose.is_empty()) {
            (true, _) => prose,
            (false, true) => header,
            (false, false) => format!("{header}\n\n{prose}"),
        }
    }
}

// --- Role definitions ---

const ROLE_KEYS: &[&str] = &[
    "session_pattern",
    "work_dir_pattern",
    "needs_pre_sync",
    "start_command",
    "env_vars",
    "stuck_threshold_minutes",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleConfig {
    pub session_pattern: Option<String>,
    pub work_dir_pattern: Option<String>,
    pub needs_pre_sync: bool,
    pub start_command: Option<String>,
    pub env_vars: BTreeMap<String, String>,
    pub stuck_threshold_minutes: Option<u32>,
}

impl RoleConfig {
    pub fn parse(description: &str) -> Self {
        let mut config = RoleConfig::default();
        for (key, value) in partition(description, ROLE_KEYS).0 {
            match key.as_str() {
                "session_pattern" => config.session_pattern = opt(value),
                "work_dir_pattern" => config.work_dir_pattern = opt(value),
                "needs_pre_sync" => config.needs_pre_sync = value.eq_ignore_ascii_case("true"),
                "start_command" => config.start_command = opt(value),
                "env_vars" => {
                    config.env_vars = value
                        .split(',')
                        .filter_map(|pair| pair.trim().split_once('='))
                        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                        .filter(|(k, _)| !k.is_empty())
                        .collect();
                }
                "stuck_threshold_minutes" => {
                    config.stuck_threshold_minutes = value.parse().ok();
                }
                _ => {}
            }
        }
        config
    }

    pub fn format(&self) -> String {
        let mut lines = Vec::new();
        if let Some(ref v) = self.session_pattern {
            lines.push(format!("session_pattern: {v}"));
        }
        if let Some(ref v) = self.work_dir_pattern {
            lines.push(format!("work_dir_pattern: {v}"));
        }
        if self.needs_pre_sync {
            lines.push("needs_pre_sync: true".to_string());
        }
        if let Some(ref v) = self.start_command {
            lines.push(format!("start_command: {v}"));
        }
        if !self.env_vars.is_empty() {
            let pairs: Vec<String> = self.env_vars.iter().map(|(k, v)| format!("{k}={v}")).collect();
            lines.push(format!("env_vars: {}", pairs.join(", ")));
        }
        if let Some(v) = self.stuck_threshold_minutes {
            lines.push(format!("stuck_threshold_minutes: {v}"));
        }
        lines.join("\n")
    }

    /// Built-in definition for each horde role.
    pub fn for_role(role: &str) -> Self {
        let (session, work_dir, pre_sync, stuck) = match role {
            "warchief" => ("gt-warchief", "{encampment}/warchief", false, None),
            "shaman" => ("gt-shaman", "{encampment}/shaman", false, None),
            "witness" => ("gt-{warband}-witness", "{encampment}/{warband}/witness", false, None),
            "forge" => ("gt-{warband}-forge", "{encampment}/{warband}/forge/project", true, None),
            "raider" => (
                "gt-{warband}-{name}",
                "{encampment}/{warband}/raiders/{name}/{warband}",
                true,
                Some(30),
            ),
            "clan" => (
                "gt-{warband}-clan-{name}",
                "{encampment}/{warband}/clan/{name}",
                true,
                None,
            ),
            _ => return RoleConfig::default(),
        };
        RoleConfig {
            session_pattern: Some(session.to_string()),
            work_dir_pattern: Some(work_dir.to_string()),
            needs_pre_sync: pre_sync,
            start_command: None,
            env_vars: BTreeMap::from([("AGENT_ROLE".to_string(), role.to_string())]),
            stuck_threshold_minutes: stuck,
        }
    }
}

// --- Queues ---

const QUEUE_KEYS: &[&str] = &[
    "name",
    "status",
    "max_concurrency",
    "processing_order",
    "available_count",
    "processing_count",
    "completed_count",
    "failed_count",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFields {
    pub name: String,
    pub status: String,
    pub max_concurrency: u32,
    pub processing_order: String,
    pub available_count: u32,
    pub processing_count: u32,
    pub completed_count: u32,
    pub failed_count: u32,
}

impl Default for QueueFields {
    fn default() -> Self {
        Self {
            name: String::new(),
            status: "active".to_string(),
            max_concurrency: 1,
            processing_order: "fifo".to_string(),
            available_count: 0,
            processing_count: 0,
            completed_count: 0,
            failed_count: 0,
        }
    }
}

impl QueueFields {
    pub fn parse(description: &str) -> Self {
        let mut fields = QueueFields::default();
        for (key, value) in partition(description, QUEUE_KEYS).0 {
            let count = || value.parse::<u32>().unwrap_or(0);
            match key.as_str() {
                "name" => fields.name = value.to_string(),
                "status" => fields.status = value.to_string(),
                "max_concurrency" => fields.max_concurrency = count(),
                "processing_order" => fields.processing_order = value.to_string(),
                "available_count" => fields.available_count = count(),
                "processing_count" => fields.processing_count = count(),
                "completed_count" => fields.completed_count = count(),
                "failed_count" => fields.failed_count = count(),
                _ => {}
            }
        }
        fields
    }

    pub fn format(&self) -> String {
        format!(
            "name: {}\nstatus: {}\nmax_concurrency: {}\nprocessing_order: {}\navailable_count: {}\nprocessing_count: {}\ncompleted_count: {}\nfailed_count: {}",
            self.name,
            self.status,
            self.max_concurrency,
            self.processing_order,
            self.available_count,
            self.processing_count,
            self.completed_count,
            self.failed_count
        )
    }
}

// --- Warband identity ---

const WARBAND_KEYS: &[&str] = &["repo", "prefix", "state"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarbandFields {
    pub repo: String,
    pub prefix: String,
    pub state: String,
}

impl WarbandFields {
    pub fn parse(description: &str) -> Self {
        let mut fields = WarbandFields::default();
        for (key, value) in partition(description, WARBAND_KEYS).0 {
            match key.as_str() {
                "repo" => fields.repo = value.to_string(),
                "prefix" => fields.prefix = value.to_string(),
                "state" => fields.state = value.to_string(),
                _ => {}
            }
        }
        fields
    }

    pub fn format(&self) -> String {
        format!("repo: {}\nprefix: {}\nstate: {}", self.repo, self.prefix, self.state)
    }
}
