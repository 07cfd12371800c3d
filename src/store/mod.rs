//! Uniform surface over the external issue store ("relics").
//!
//! Every persistent cross-agent fact lives in the store; horde only reads and
//! writes it through [`IssueStore`]. The production backend shells out to the
//! `bd` CLI ([`relics::Relics`]); tests use an in-memory store.

pub mod agent;
pub mod fields;
pub mod ids;
#[cfg(test)]
pub mod memory;
pub mod redirect;
pub mod relics;
pub mod routes;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use fields::{AgentFields, AgentState, CleanupStatus, MrFields};

/// Exported to every store subprocess so discovery cannot escape the warband.
pub const STORE_DIR_ENV: &str = "RELICS_DIR";
/// Provenance for created records.
pub const ACTOR_ENV: &str = "BD_ACTOR";
/// Directory name of a store inside a workspace.
pub const STORE_DIR_NAME: &str = ".store";

pub const STATUS_OPEN: &str = "open";
pub const STATUS_IN_PROGRESS: &str = "in_progress";
pub const STATUS_BANNERED: &str = "bannered";
pub const STATUS_CLOSED: &str = "closed";

/// A store record. Unknown JSON fields from the CLI are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub issue_type: String,
    #[serde(default)]
    pub assignee: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub closed_at: Option<String>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub dependents: Vec<Dependent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dependent {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub dependency_type: String,
}

impl Issue {
    pub fn is_closed(&self) -> bool {
        self.status == STATUS_CLOSED
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Value of the first `<prefix>:<value>` label.
    pub fn label_value(&self, prefix: &str) -> Option<&str> {
        self.labels
            .iter()
            .find_map(|l| l.strip_prefix(prefix).and_then(|rest| rest.strip_prefix(':')))
    }

    pub fn label_values<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.labels
            .iter()
            .filter_map(move |l| l.strip_prefix(prefix).and_then(|rest| rest.strip_prefix(':')))
    }
}

/// Filters for [`IssueStore::list`]. Unset fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilter {
    pub issue_type: Option<String>,
    pub status: Option<String>,
    pub priority: Option<i32>,
    pub assignee: Option<String>,
    pub label: Option<String>,
    /// Include closed records when no status is given.
    pub all: bool,
}

impl ListFilter {
    pub fn matches(&self, issue: &Issue) -> bool {
        if let Some(ref t) = self.issue_type
            && &issue.issue_type != t
        {
            return false;
        }
        match self.status {
            Some(ref s) if &issue.status != s => return false,
            None if !self.all && issue.is_closed() => return false,
            _ => {}
        }
        if let Some(p) = self.priority
            && issue.priority != p
        {
            return false;
        }
        if let Some(ref a) = self.assignee
            && &issue.assignee != a
        {
            return false;
        }
        if let Some(ref l) = self.label
            && !issue.has_label(l)
        {
            return false;
        }
        true
    }
}

/// Fields for [`IssueStore::create`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateFields {
    /// Explicit id; the store allocates one when unset.
    pub id: Option<String>,
    pub title: String,
    pub description: String,
    pub issue_type: String,
    pub priority: Option<i32>,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
    pub actor: Option<String>,
}

/// Partial update for [`IssueStore::update`]. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdatePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<i32>,
    /// `Some("")` clears the assignee.
    pub assignee: Option<String>,
}

impl UpdatePatch {
    pub fn is_empty(&self) -> bool {
        *self == UpdatePatch::default()
    }
}

/// The store capability. Errors are normalized to `NotFound`, `Unavailable`
/// and `Transient` kinds of [`crate::error::HordeError`].
pub trait IssueStore {
    fn list(&self, filter: &ListFilter) -> anyhow::Result<Vec<Issue>>;
    fn show(&self, id: &str) -> anyhow::Result<Issue>;
    fn create(&self, fields: &CreateFields) -> anyhow::Result<Issue>;
    fn update(&self, id: &str, patch: &UpdatePatch) -> anyhow::Result<()>;
    fn close(&self, id: &str, reason: &str) -> anyhow::Result<()>;
    fn reopen(&self, id: &str, reason: &str) -> anyhow::Result<()>;
    fn label_add(&self, id: &str, label: &str) -> anyhow::Result<()>;
    fn label_remove(&self, id: &str, label: &str) -> anyhow::Result<()>;

    /// Initialize a fresh store with the given id prefix.
    fn init(&self, prefix: &str) -> anyhow::Result<()>;

    /// Push/pull with the store's sync remote.
    fn sync(&self) -> anyhow::Result<()>;

    /// All records (open or closed) in a conversation thread.
    fn list_by_thread(&self, thread_id: &str) -> anyhow::Result<Vec<Issue>> {
        self.list(&ListFilter {
            label: Some(format!("thread:{thread_id}")),
            all: true,
            ..Default::default()
        })
    }

    /// `show`, mapping not-found to `None`.
    fn find(&self, id: &str) -> anyhow::Result<Option<Issue>> {
        match self.show(id) {
            Ok(issue) => Ok(Some(issue)),
            Err(e) if crate::error::is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<T: IssueStore + ?Sized> IssueStore for &T {
    fn list(&self, filter: &ListFilter) -> anyhow::Result<Vec<Issue>> {
        (**self).list(filter)
    }
    fn show(&self, id: &str) -> anyhow::Result<Issue> {
        (**self).show(id)
    }
    fn create(&self, fields: &CreateFields) -> anyhow::Result<Issue> {
        (**self).create(fields)
    }
    fn update(&self, id: &str, patch: &UpdatePatch) -> anyhow::Result<()> {
        (**self).update(id, patch)
    }
    fn close(&self, id: &str, reason: &str) -> anyhow::Result<()> {
        (**self).close(id, reason)
    }
    fn reopen(&self, id: &str, reason: &str) -> anyhow::Result<()> {
        (**self).reopen(id, reason)
    }
    fn label_add(&self, id: &str, label: &str) -> anyhow::Result<()> {
        (**self).label_add(id, label)
    }
    fn label_remove(&self, id: &str, label: &str) -> anyhow::Result<()> {
        (**self).label_remove(id, label)
    }
    fn init(&self, prefix: &str) -> anyhow::Result<()> {
        (**self).init(prefix)
    }
    fn sync(&self) -> anyhow::Result<()> {
        (**self).sync()
    }
}

/// Opens a store handle for a resolved store directory.
pub trait StoreProvider {
    fn open<'a>(&'a self, store_dir: &Path) -> Box<dyn IssueStore + 'a>;
}
