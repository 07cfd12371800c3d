//! Append-only activity journal at `<encampment>/.events.jsonl`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::fsutil;

pub const EVENTS_FILE: &str = ".events.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub ts: String,
    pub kind: String,
    pub actor: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(encampment_root: &Path) -> Self {
        Self {
            path: encampment_root.join(EVENTS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, kind: &str, actor: &str, payload: serde_json::Value) -> anyhow::Result<()> {
        let event = Event {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            kind: kind.to_string(),
            actor: actor.to_string(),
            payload,
        };
        let line = serde_json::to_string(&event).context("serializing event")?;
        fsutil::append_line(&self.path, &line)
    }

    /// Append, logging instead of failing. Events never block the operation
    /// that produced them.
    pub fn record(&self, kind: &str, actor: &str, payload: serde_json::Value) {
        if let Err(e) = self.append(kind, actor, payload) {
            tracing::warn!(kind, error = %format!("{e:#}"), "could not record event");
        }
    }

    /// The last `n` events, oldest first. Unparseable lines are skipped.
    pub fn recent(&self, n: usize) -> anyhow::Result<Vec<Event>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", self.path.display())),
        };
        let events: Vec<Event> = contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        let skip = events.len().saturating_sub(n);
        Ok(events.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn append_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path());
        assert!(log.recent(5).unwrap().is_empty());

        for i in 0..4 {
            log.append("muster", "horde/witness", json!({"n": i})).unwrap();
        }
        std::fs::write(
            log.path(),
            format!("{}garbage\n", std::fs::read_to_string(log.path()).unwrap()),
        )
        .unwrap();
        log.record("nuke", "horde/witness", serde_json::Value::Null);

        let tail = log.recent(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].payload, json!({"n": 3}));
        assert_eq!(tail[1].kind, "nuke");
        assert!(!std::fs::read_to_string(log.path()).unwrap().contains("\"payload\":null"));
    }
}
