//! One identity's mailbox, backed by the issue store or a legacy JSONL inbox.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use chrono::{Duration, Utc};

use super::address;
use super::message::{MESSAGE_LABEL, MESSAGE_TYPE, Message, READ_LABEL};
use crate::error::HordeError;
use crate::fsutil;
use crate::store::{Issue, IssueStore, ListFilter, STATUS_BANNERED, STATUS_OPEN};

pub const INBOX_FILE: &str = "inbox.jsonl";
pub const ARCHIVE_FILE: &str = "archive.jsonl";

/// Serializes JSONL rewrites and appends within this process.
static JSONL_LOCK: Mutex<()> = Mutex::new(());

fn jsonl_lock() -> MutexGuard<'static, ()> {
    JSONL_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Backend<'a> {
    Store {
        store: Box<dyn IssueStore + 'a>,
        store_dir: PathBuf,
    },
    Jsonl {
        inbox: PathBuf,
    },
}

/// Search over the inbox. Query and sender filter are literal text.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub query: String,
    /// Sender prefix, matched case-insensitively from the start.
    pub from: Option<String>,
    pub subject_only: bool,
    pub body_only: bool,
}

pub struct Mailbox<'a> {
    identity: String,
    backend: Backend<'a>,
}

impl std::fmt::Debug for Mailbox<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("identity", &self.identity)
            .field("location", &self.location())
            .finish()
    }
}

impl<'a> Mailbox<'a> {
    pub fn store(identity: &str, store: Box<dyn IssueStore + 'a>, store_dir: &Path) -> Self {
        Self {
            identity: address::normalize(identity),
            backend: Backend::Store {
                store,
                store_dir: store_dir.to_path_buf(),
            },
        }
    }

    pub fn jsonl(identity: &str, inbox: &Path) -> Self {
        Self {
            identity: address::normalize(identity),
            backend: Backend::Jsonl {
                inbox: inbox.to_path_buf(),
            },
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_jsonl(&self) -> bool {
        matches!(self.backend, Backend::Jsonl { .. })
    }

    /// The store directory or inbox file this mailbox reads.
    pub fn location(&self) -> &Path {
        match self.backend {
            Backend::Store { ref store_dir, .. } => store_dir,
            Backend::Jsonl { ref inbox } => inbox,
        }
    }

    pub fn archive_path(&self) -> PathBuf {
        match self.backend {
            Backend::Store { ref store_dir, .. } => store_dir.join(ARCHIVE_FILE),
            Backend::Jsonl { ref inbox } => inbox.with_file_name(ARCHIVE_FILE),
        }
    }

    /// Inbox contents, newest first.
    pub fn list(&self) -> anyhow::Result<Vec<Message>> {
        let mut messages = match self.backend {
            Backend::Store { ref store, .. } => self.list_store(store.as_ref())?,
            Backend::Jsonl { ref inbox } => read_jsonl(inbox)?,
        };
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(messages)
    }

    fn list_store(&self, store: &dyn IssueStore) -> anyhow::Result<Vec<Message>> {
        let mut seen: BTreeMap<String, Issue> = BTreeMap::new();
        for variant in address::variants(&self.identity) {
            for status in [STATUS_OPEN, STATUS_BANNERED] {
                let filter = ListFilter {
                    status: Some(status.to_string()),
                    assignee: Some(variant.clone()),
                    ..Default::default()
                };
                for issue in store.list(&filter)? {
                    seen.entry(issue.id.clone()).or_insert(issue);
                }
            }
            let cc = ListFilter {
                status: Some(STATUS_OPEN.to_string()),
                label: Some(format!("cc:{variant}")),
                ..Default::default()
            };
            for issue in store.list(&cc)? {
                seen.entry(issue.id.clone()).or_insert(issue);
            }
        }
        Ok(seen
            .values()
            .filter(|issue| is_message(issue))
            .map(Message::from_issue)
            .collect())
    }

    pub fn list_unread(&self) -> anyhow::Result<Vec<Message>> {
        Ok(self.list()?.into_iter().filter(|m| !m.read).collect())
    }

    pub fn get(&self, id: &str) -> anyhow::Result<Message> {
        match self.backend {
            Backend::Store { ref store, .. } => {
                let issue = store.show(id)?;
                if !is_message(&issue) {
                    return Err(HordeError::NotFound(format!("message {id}")).into());
                }
                Ok(Message::from_issue(&issue))
            }
            Backend::Jsonl { ref inbox } => read_jsonl(inbox)?
                .into_iter()
                .find(|m| m.id == id)
                .ok_or_else(|| HordeError::NotFound(format!("message {id}")).into()),
        }
    }

    /// Mark read. Closes the store record.
    pub fn mark_read(&self, id: &str) -> anyhow::Result<()> {
        match self.backend {
            Backend::Store { ref store, .. } => store.close(id, "read"),
            Backend::Jsonl { ref inbox } => set_read(inbox, id, true),
        }
    }

    /// Mark read but leave the store record open.
    pub fn mark_read_only(&self, id: &str) -> anyhow::Result<()> {
        match self.backend {
            Backend::Store { ref store, .. } => store.label_add(id, READ_LABEL),
            Backend::Jsonl { ref inbox } => set_read(inbox, id, true),
        }
    }

    /// Undo either kind of read marking.
    pub fn mark_unread(&self, id: &str) -> anyhow::Result<()> {
        match self.backend {
            Backend::Store { ref store, .. } => {
                let issue = store.show(id)?;
                if issue.is_closed() {
                    store.reopen(id, "marked unread")?;
                }
                if issue.has_label(READ_LABEL) {
                    store.label_remove(id, READ_LABEL)?;
                }
                Ok(())
            }
            Backend::Jsonl { ref inbox } => set_read(inbox, id, false),
        }
    }

    /// Drop the `read` label without reopening.
    pub fn mark_unread_only(&self, id: &str) -> anyhow::Result<()> {
        match self.backend {
            Backend::Store { ref store, .. } => store.label_remove(id, READ_LABEL),
            Backend::Jsonl { ref inbox } => set_read(inbox, id, false),
        }
    }

    /// Remove from the inbox. Store records are closed, never deleted.
    pub fn delete(&self, id: &str) -> anyhow::Result<()> {
        match self.backend {
            Backend::Store { ref store, .. } => store.close(id, "deleted"),
            Backend::Jsonl { ref inbox } => {
                let _lock = jsonl_lock();
                let mut messages = read_jsonl(inbox)?;
                let before = messages.len();
                messages.retain(|m| m.id != id);
                if messages.len() == before {
                    return Err(HordeError::NotFound(format!("message {id}")).into());
                }
                write_jsonl(inbox, &messages)
            }
        }
    }

    /// Copy to the archive, then delete from the inbox. An id already in the
    /// archive is not written twice, so a retry after a failed delete is safe.
    pub fn archive(&self, id: &str) -> anyhow::Result<()> {
        let message = self.get(id)?;
        {
            let path = self.archive_path();
            let _lock = jsonl_lock();
            if !read_jsonl(&path)?.iter().any(|m| m.id == message.id) {
                fsutil::append_line(&path, &serde_json::to_string(&message)?)?;
            }
        }
        self.delete(id)?;
        tracing::debug!(id, identity = %self.identity, "message archived");
        Ok(())
    }

    pub fn list_archived(&self) -> anyhow::Result<Vec<Message>> {
        let mut messages = read_jsonl(&self.archive_path())?;
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(messages)
    }

    /// Drop archived messages older than `days`. Returns how many were removed.
    pub fn purge_archive(&self, days: u32) -> anyhow::Result<usize> {
        let path = self.archive_path();
        let _lock = jsonl_lock();
        let mut messages = read_jsonl(&path)?;
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let before = messages.len();
        messages.retain(|m| m.timestamp >= cutoff);
        let removed = before - messages.len();
        if removed > 0 {
            write_jsonl(&path, &messages)?;
        }
        Ok(removed)
    }

    pub fn search(&self, query: &SearchQuery) -> anyhow::Result<Vec<Message>> {
        let text = regex::RegexBuilder::new(&regex::escape(&query.query))
            .case_insensitive(true)
            .build()
            .context("compiling search query")?;
        let from = match query.from {
            Some(ref from) => Some(
                regex::Regex::new(&format!("(?i)^{}", regex::escape(from)))
                    .context("compiling sender filter")?,
            ),
            None => None,
        };
        Ok(self
            .list()?
            .into_iter()
            .filter(|m| from.as_ref().is_none_or(|re| re.is_match(&m.from)))
            .filter(|m| {
                if query.subject_only {
                    text.is_match(&m.subject)
                } else if query.body_only {
                    text.is_match(&m.body)
                } else {
                    text.is_match(&m.subject) || text.is_match(&m.body)
                }
            })
            .collect())
    }

    /// `(total, unread)`.
    pub fn count(&self) -> anyhow::Result<(usize, usize)> {
        let messages = self.list()?;
        let unread = messages.iter().filter(|m| !m.read).count();
        Ok((messages.len(), unread))
    }

    /// Append to a JSONL inbox.
    pub fn append(&self, message: &Message) -> anyhow::Result<()> {
        match self.backend {
            Backend::Store { .. } => Err(HordeError::Validation(format!(
                "mailbox for {} is store-backed; append applies to JSONL inboxes only",
                self.identity
            ))
            .into()),
            Backend::Jsonl { ref inbox } => {
                let line = serde_json::to_string(message)?;
                let _lock = jsonl_lock();
                fsutil::append_line(inbox, &line)
            }
        }
    }

    /// Deliver `message` into this mailbox. Returns the id it is stored under.
    pub fn deliver(&self, message: &Message) -> anyhow::Result<String> {
        match self.backend {
            Backend::Store { ref store, .. } => Ok(store.create(&message.to_create_fields())?.id),
            Backend::Jsonl { .. } => {
                self.append(message)?;
                Ok(message.id.clone())
            }
        }
    }

    /// Every message in a thread, oldest first.
    pub fn list_by_thread(&self, thread_id: &str) -> anyhow::Result<Vec<Message>> {
        let mut messages: Vec<Message> = match self.backend {
            Backend::Store { ref store, .. } => store
                .list_by_thread(thread_id)?
                .iter()
                .filter(|issue| is_message(issue))
                .map(Message::from_issue)
                .collect(),
            Backend::Jsonl { ref inbox } => read_jsonl(inbox)?
                .into_iter()
                .filter(|m| m.thread_id == thread_id)
                .collect(),
        };
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(messages)
    }
}

fn is_message(issue: &Issue) -> bool {
    issue.issue_type == MESSAGE_TYPE || issue.has_label(MESSAGE_LABEL)
}

fn read_jsonl(path: &Path) -> anyhow::Result<Vec<Message>> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let mut messages = Vec::new();
    for (n, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(line) {
            Ok(m) => messages.push(m),
            Err(e) => tracing::warn!(
                path = %path.display(),
                line = n + 1,
                error = %e,
                "skipping malformed mailbox line"
            ),
        }
    }
    Ok(messages)
}

fn write_jsonl(path: &Path, messages: &[Message]) -> anyhow::Result<()> {
    let mut buf = String::new();
    for m in messages {
        buf.push_str(&serde_json::to_string(m)?);
        buf.push('\n');
    }
    fsutil::atomic_write(path, buf.as_bytes())
}

fn set_read(inbox: &Path, id: &str, read: bool) -> anyhow::Result<()> {
    let _lock = jsonl_lock();
    let mut messages = read_jsonl(inbox)?;
    let message = messages
        .iter_mut()
        .find(|m| m.id == id)
        .ok_or_else(|| HordeError::NotFound(format!("message {id}")))?;
    message.read = read;
    write_jsonl(inbox, &messages)
}
