//! Merge protocol message types and payloads.
//!
//! Subjects are `<TYPE> <raider>`; bodies are [`Body`] blocks.

use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use super::body::Body;
use crate::drums::{Message, MessageKind, Priority};
use crate::error::HordeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    MergeReady,
    Merged,
    MergeFailed,
    ReworkRequest,
}

impl MessageType {
    pub const ALL: [MessageType; 4] = [
        MessageType::MergeReady,
        MessageType::Merged,
        MessageType::MergeFailed,
        MessageType::ReworkRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::MergeReady => "MERGE_READY",
            MessageType::Merged => "MERGED",
            MessageType::MergeFailed => "MERGE_FAILED",
            MessageType::ReworkRequest => "REWORK_REQUEST",
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown protocol message type {s:?}"))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type and raider named by a protocol subject, or `None` for anything else.
pub fn parse_subject(subject: &str) -> Option<(MessageType, &str)> {
    let (kind, raider) = subject.split_once(' ')?;
    if raider.is_empty() || raider.contains(char::is_whitespace) {
        return None;
    }
    Some((kind.parse().ok()?, raider))
}

pub fn parse_message_type(subject: &str) -> Option<MessageType> {
    parse_subject(subject).map(|(t, _)| t)
}

pub fn subject(kind: MessageType, raider: &str) -> String {
    format!("{kind} {raider}")
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn required(body: &Body, key: &str, kind: MessageType) -> anyhow::Result<String> {
    body.get(key)
        .map(str::to_string)
        .ok_or_else(|| HordeError::ProtocolParse(format!("{kind} body is missing {key}")).into())
}

fn optional(body: &Body, key: &str) -> Option<String> {
    body.get(key).map(str::to_string)
}

// --- Payloads ---

const HEADER_KEYS: &[&str] = &["Branch", "Issue", "Raider", "Warband", "Target"];

/// Fields every protocol message carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeHeader {
    pub branch: String,
    pub issue: String,
    pub raider: String,
    pub warband: String,
    pub target: String,
}

impl MergeHeader {
    fn parse(body: &Body, kind: MessageType) -> anyhow::Result<Self> {
        Ok(Self {
            branch: required(body, "Branch", kind)?,
            issue: optional(body, "Issue").unwrap_or_default(),
            raider: required(body, "Raider", kind)?,
            warband: optional(body, "Warband").unwrap_or_default(),
            target: optional(body, "Target").unwrap_or_else(|| crate::config::DEFAULT_BRANCH.to_string()),
        })
    }

    fn write(&self, body: &mut Body) {
        body.set("Branch", &self.branch);
        body.set("Issue", &self.issue);
        body.set("Raider", &self.raider);
        body.set("Warband", &self.warband);
        body.set("Target", &self.target);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReadyPayload {
    pub header: MergeHeader,
    /// Unknown keys and prose, re-emitted on format.
    pub extra: Body,
}

impl MergeReadyPayload {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let body = Body::parse(text);
        Ok(Self {
            header: MergeHeader::parse(&body, MessageType::MergeReady)?,
            extra: body.without(HEADER_KEYS),
        })
    }

    pub fn to_body(&self) -> String {
        let mut body = Body::new();
        self.header.write(&mut body);
        body.extend(&self.extra);
        body.render()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedPayload {
    pub header: MergeHeader,
    pub merged_at: String,
    pub merge_commit: Option<String>,
    pub extra: Body,
}

impl MergedPayload {
    const KEYS: &'static [&'static str] = &["Merged-At", "Merge-Commit"];

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let body = Body::parse(text);
        Ok(Self {
            header: MergeHeader::parse(&body, MessageType::Merged)?,
            merged_at: optional(&body, "Merged-At").unwrap_or_default(),
            merge_commit: optional(&body, "Merge-Commit"),
            extra: body.without(HEADER_KEYS).without(Self::KEYS),
        })
    }

    pub fn to_body(&self) -> String {
        let mut body = Body::new();
        self.header.write(&mut body);
        body.set("Merged-At", &self.merged_at);
        body.set_opt("Merge-Commit", self.merge_commit.as_deref());
        body.extend(&self.extra);
        body.render()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureType {
    Tests,
    Build,
    Push,
    #[default]
    Other,
}

impl FailureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::Tests => "tests",
            FailureType::Build => "build",
            FailureType::Push => "push",
            FailureType::Other => "other",
        }
    }

    /// Lenient: anything unrecognized is `Other`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "tests" | "test" => FailureType::Tests,
            "build" => FailureType::Build,
            "push" => FailureType::Push,
            _ => FailureType::Other,
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeFailedPayload {
    pub header: MergeHeader,
    pub failed_at: String,
    pub failure_type: FailureType,
    pub error: Option<String>,
    pub extra: Body,
}

impl MergeFailedPayload {
    const KEYS: &'static [&'static str] = &["Failed-At", "Failure-Type", "Error"];

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let body = Body::parse(text);
        Ok(Self {
            header: MergeHeader::parse(&body, MessageType::MergeFailed)?,
            failed_at: optional(&body, "Failed-At").unwrap_or_default(),
            failure_type: body.get("Failure-Type").map(FailureType::parse).unwrap_or_default(),
            error: optional(&body, "Error"),
            extra: body.without(HEADER_KEYS).without(Self::KEYS),
        })
    }

    pub fn to_body(&self) -> String {
        let mut body = Body::new();
        self.header.write(&mut body);
        body.set("Failed-At", &self.failed_at);
        body.set("Failure-Type", self.failure_type.as_str());
        body.set_opt("Error", self.error.as_deref());
        body.extend(&self.extra);
        body.render()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReworkRequestPayload {
    pub header: MergeHeader,
    pub requested_at: String,
    pub conflict_files: Vec<String>,
    pub extra: Body,
}

impl ReworkRequestPayload {
    const KEYS: &'static [&'static str] = &["Requested-At", "Conflict-Files"];

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let body = Body::parse(text);
        let conflict_files = body
            .get("Conflict-Files")
            .map(|files| {
                files
                    .split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            header: MergeHeader::parse(&body, MessageType::ReworkRequest)?,
            requested_at: optional(&body, "Requested-At").unwrap_or_default(),
            conflict_files,
            extra: body.without(HEADER_KEYS).without(Self::KEYS),
        })
    }

    pub fn to_body(&self) -> String {
        let mut body = Body::new();
        self.header.write(&mut body);
        body.set("Requested-At", &self.requested_at);
        if !self.conflict_files.is_empty() {
            body.set("Conflict-Files", &self.conflict_files.join(", "));
        }
        body.extend(&self.extra);
        body.render()
    }
}

// --- Builders ---

fn protocol_message(from: &str, to: &str, kind: MessageType, raider: &str, body: String) -> Message {
    Message::new(from, to, &subject(kind, raider), &body).with_kind(MessageKind::Task)
}

/// Witness → forge.
pub fn merge_ready(from: &str, to: &str, header: MergeHeader) -> Message {
    let raider = header.raider.clone();
    let payload = MergeReadyPayload {
        header,
        extra: Body::new(),
    };
    protocol_message(from, to, MessageType::MergeReady, &raider, payload.to_body())
}

/// Forge → witness.
pub fn merged(from: &str, to: &str, header: MergeHeader, merge_commit: Option<&str>) -> Message {
    let raider = header.raider.clone();
    let payload = MergedPayload {
        header,
        merged_at: now(),
        merge_commit: merge_commit.map(str::to_string),
        extra: Body::new(),
    };
    protocol_message(from, to, MessageType::Merged, &raider, payload.to_body())
}

pub fn merge_failed(
    from: &str,
    to: &str,
    header: MergeHeader,
    failure_type: FailureType,
    error: Option<&str>,
) -> Message {
    let raider = header.raider.clone();
    let payload = MergeFailedPayload {
        header,
        failed_at: now(),
        failure_type,
        error: error.map(str::to_string),
        extra: Body::new(),
    };
    protocol_message(from, to, MessageType::MergeFailed, &raider, payload.to_body())
        .with_priority(Priority::High)
}

pub fn rework_request(from: &str, to: &str, header: MergeHeader, conflict_files: Vec<String>) -> Message {
    let raider = header.raider.clone();
    let payload = ReworkRequestPayload {
        header,
        requested_at: now(),
        conflict_files,
        extra: Body::new(),
    };
    protocol_message(from, to, MessageType::ReworkRequest, &raider, payload.to_body())
        .with_priority(Priority::High)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> MergeHeader {
        MergeHeader {
            branch: "raider/toast-k2".into(),
            issue: "hd-t1".into(),
            raider: "toast".into(),
            warband: "horde".into(),
            target: "main".into(),
        }
    }

    #[test]
    fn subject_iff_type() {
        assert_eq!(parse_subject("MERGED toast"), Some((MessageType::Merged, "toast")));
        assert_eq!(parse_message_type("REWORK_REQUEST raider-07"), Some(MessageType::ReworkRequest));
        for s in ["MERGED", "MERGED ", "merged toast", "MERGED toast now", "Re: MERGED toast", "HELLO toast", ""] {
            assert_eq!(parse_message_type(s), None, "{s:?}");
        }
        for t in MessageType::ALL {
            assert_eq!(parse_message_type(&subject(t, "nux")), Some(t));
        }
    }

    #[test]
    fn rework_request_conflict_files() {
        let body = "Branch: raider/toast/hd-a\nIssue: hd-a\nRaider: toast\nWarband: horde\nTarget: main\nConflict-Files: a.go, b.go\n";
        let payload = ReworkRequestPayload::parse(body).unwrap();
        assert_eq!(payload.header.branch, "raider/toast/hd-a");
        assert_eq!(payload.header.issue, "hd-a");
        assert_eq!(payload.header.raider, "toast");
        assert_eq!(payload.header.warband, "horde");
        assert_eq!(payload.header.target, "main");
        assert_eq!(payload.conflict_files, vec!["a.go", "b.go"]);
    }

    #[test]
    fn merged_parse_is_tolerant() {
        let payload = MergedPayload::parse(
            "branch:raider/toast-k2\nRAIDER:  toast \nmerge-commit: abc\nReviewed-By: ana\n\nShipped.\n",
        )
        .unwrap();
        assert_eq!(payload.header.raider, "toast");
        assert_eq!(payload.header.target, "main");
        assert_eq!(payload.merge_commit.as_deref(), Some("abc"));
        let out = payload.to_body();
        assert!(out.contains("Reviewed-By: ana\n"));
        assert!(out.ends_with("\nShipped.\n"));
        assert_eq!(MergedPayload::parse(&out).unwrap(), payload);
    }

    #[test]
    fn missing_required_field_is_parse_error() {
        let err = MergedPayload::parse("Issue: hd-1\n").unwrap_err();
        assert_eq!(crate::error::kind_of(&err), Some(crate::error::ErrorKind::ProtocolParse));
    }

    #[test]
    fn builders() {
        let msg = merge_failed("horde/forge", "horde/witness", header(), FailureType::Tests, Some("3 failed"));
        assert_eq!(msg.subject, "MERGE_FAILED toast");
        assert_eq!(msg.priority, Priority::High);
        let payload = MergeFailedPayload::parse(&msg.body).unwrap();
        assert_eq!(payload.failure_type, FailureType::Tests);
        assert_eq!(payload.error.as_deref(), Some("3 failed"));
        assert!(!payload.failed_at.is_empty());

        let merged = merged("horde/forge", "horde/witness", header(), Some("abc"));
        assert_eq!(merged.priority, Priority::Normal);
        assert_eq!(MergedPayload::parse(&merged.body).unwrap().header, header());

        let ready = merge_ready("horde/witness", "horde/forge", header());
        assert_eq!(parse_message_type(&ready.subject), Some(MessageType::MergeReady));
    }
}
