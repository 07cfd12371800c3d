//! In-process store with the same observable contract as the CLI backend.
//!
//! Timestamps come from a logical clock so ordering is deterministic.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use super::{
    CreateFields, Issue, IssueStore, ListFilter, STATUS_CLOSED, STATUS_OPEN, StoreProvider,
    UpdatePatch,
};
use crate::error::HordeError;

#[derive(Debug)]
struct Inner {
    prefix: String,
    issues: BTreeMap<String, Issue>,
    next_id: u64,
    tick: i64,
    unavailable: bool,
    inits: Vec<String>,
    opened: Vec<PathBuf>,
    syncs: usize,
}

#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("hd")
    }
}

impl MemoryStore {
    pub fn new(prefix: &str) -> Self {
        Self {
            inner: Mutex::new(Inner {
                prefix: prefix.to_string(),
                issues: BTreeMap::new(),
                next_id: 1,
                tick: 0,
                unavailable: false,
                inits: Vec::new(),
                opened: Vec::new(),
                syncs: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make every subsequent call fail as if the CLI were missing.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Insert a record verbatim.
    pub fn insert(&self, issue: Issue) {
        self.lock().issues.insert(issue.id.clone(), issue);
    }

    pub fn get(&self, id: &str) -> Option<Issue> {
        self.lock().issues.get(id).cloned()
    }

    pub fn all(&self) -> Vec<Issue> {
        self.lock().issues.values().cloned().collect()
    }

    /// Prefixes passed to `init`, in order.
    pub fn inits(&self) -> Vec<String> {
        self.lock().inits.clone()
    }

    /// Store directories handed to `open`, in order.
    pub fn opened(&self) -> Vec<PathBuf> {
        self.lock().opened.clone()
    }

    pub fn sync_count(&self) -> usize {
        self.lock().syncs
    }

    fn check(inner: &Inner) -> anyhow::Result<()> {
        if inner.unavailable {
            return Err(HordeError::Unavailable("store unavailable".into()).into());
        }
        Ok(())
    }

    fn now(inner: &mut Inner) -> String {
        inner.tick += 1;
        let base = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        (base + Duration::seconds(inner.tick)).to_rfc3339()
    }

    fn with_issue<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Issue, String) -> R,
    ) -> anyhow::Result<R> {
        let mut inner = self.lock();
        Self::check(&inner)?;
        let now = Self::now(&mut inner);
        let issue = inner
            .issues
            .get_mut(id)
            .ok_or_else(|| HordeError::NotFound(format!("issue {id}")))?;
        issue.updated_at = now.clone();
        Ok(f(issue, now))
    }
}

impl IssueStore for MemoryStore {
    fn list(&self, filter: &ListFilter) -> anyhow::Result<Vec<Issue>> {
        let inner = self.lock();
        Self::check(&inner)?;
        Ok(inner
            .issues
            .values()
            .filter(|issue| filter.matches(issue))
            .cloned()
            .collect())
    }

    fn show(&self, id: &str) -> anyhow::Result<Issue> {
        let inner = self.lock();
        Self::check(&inner)?;
        inner
            .issues
            .get(id)
            .cloned()
            .ok_or_else(|| HordeError::NotFound(format!("issue {id}")).into())
    }

    fn create(&self, fields: &CreateFields) -> anyhow::Result<Issue> {
        let mut inner = self.lock();
        Self::check(&inner)?;
        let id = match fields.id {
            Some(ref id) => {
                if inner.issues.contains_key(id) {
                    return Err(HordeError::Exists(format!("issue {id}")).into());
                }
                id.clone()
            }
            None => {
                let id = format!("{}-{}", inner.prefix, inner.next_id);
                inner.next_id += 1;
                id
            }
        };
        let now = Self::now(&mut inner);
        let issue = Issue {
            id: id.clone(),
            title: fields.title.clone(),
            description: fields.description.clone(),
            status: STATUS_OPEN.to_string(),
            priority: fields.priority.unwrap_or(2),
            issue_type: if fields.issue_type.is_empty() {
                "task".to_string()
            } else {
                fields.issue_type.clone()
            },
            assignee: fields.assignee.clone().unwrap_or_default(),
            labels: fields.labels.clone(),
            created_at: now.clone(),
            updated_at: now,
            closed_at: None,
            created_by: fields.actor.clone().unwrap_or_default(),
            dependents: Vec::new(),
        };
        inner.issues.insert(id, issue.clone());
        Ok(issue)
    }

    fn update(&self, id: &str, patch: &UpdatePatch) -> anyhow::Result<()> {
        self.with_issue(id, |issue, _| {
            if let Some(ref t) = patch.title {
                issue.title = t.clone();
            }
            if let Some(ref d) = patch.description {
                issue.description = d.clone();
            }
            if let Some(ref s) = patch.status {
                issue.status = s.clone();
            }
            if let Some(p) = patch.priority {
                issue.priority = p;
            }
            if let Some(ref a) = patch.assignee {
                issue.assignee = a.clone();
            }
        })
    }

    fn close(&self, id: &str, _reason: &str) -> anyhow::Result<()> {
        self.with_issue(id, |issue, now| {
            if !issue.is_closed() {
                issue.status = STATUS_CLOSED.to_string();
                issue.closed_at = Some(now);
            }
        })
    }

    fn reopen(&self, id: &str, _reason: &str) -> anyhow::Result<()> {
        self.with_issue(id, |issue, _| {
            issue.status = STATUS_OPEN.to_string();
            issue.closed_at = None;
        })
    }

    fn label_add(&self, id: &str, label: &str) -> anyhow::Result<()> {
        self.with_issue(id, |issue, _| {
            if !issue.has_label(label) {
                issue.labels.push(label.to_string());
            }
        })
    }

    fn label_remove(&self, id: &str, label: &str) -> anyhow::Result<()> {
        self.with_issue(id, |issue, _| issue.labels.retain(|l| l != label))
    }

    fn init(&self, prefix: &str) -> anyhow::Result<()> {
        let mut inner = self.lock();
        Self::check(&inner)?;
        inner.inits.push(prefix.to_string());
        Ok(())
    }

    fn sync(&self) -> anyhow::Result<()> {
        let mut inner = self.lock();
        Self::check(&inner)?;
        inner.syncs += 1;
        Ok(())
    }
}

/// Every directory maps onto the same in-memory store.
impl StoreProvider for MemoryStore {
    fn open<'a>(&'a self, store_dir: &Path) -> Box<dyn IssueStore + 'a> {
        self.lock().opened.push(store_dir.to_path_buf());
        Box::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_show_close_reopen() {
        let store = MemoryStore::new("hd");
        let created = store
            .create(&CreateFields {
                title: "first".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(created.id, "hd-1");
        assert_eq!(store.show("hd-1").unwrap().title, "first");

        store.close("hd-1", "done").unwrap();
        assert!(store.show("hd-1").unwrap().is_closed());
        assert!(store.list(&ListFilter::default()).unwrap().is_empty());

        // A second close is accepted and leaves the record closed.
        store.close("hd-1", "again").unwrap();
        assert!(store.show("hd-1").unwrap().is_closed());

        store.reopen("hd-1", "back").unwrap();
        assert_eq!(store.show("hd-1").unwrap().status, STATUS_OPEN);
    }

    #[test]
    fn explicit_id_conflicts() {
        let store = MemoryStore::default();
        let fields = CreateFields {
            id: Some("hd-horde-witness".into()),
            ..Default::default()
        };
        store.create(&fields).unwrap();
        let err = store.create(&fields).unwrap_err();
        assert_eq!(
            crate::error::kind_of(&err),
            Some(crate::error::ErrorKind::Exists)
        );
    }

    #[test]
    fn missing_is_not_found_and_find_maps_to_none() {
        let store = MemoryStore::default();
        assert!(crate::error::is_not_found(&store.show("hd-x").unwrap_err()));
        assert!(store.find("hd-x").unwrap().is_none());
    }

    #[test]
    fn thread_listing_includes_closed() {
        let store = MemoryStore::default();
        for _ in 0..2 {
            store
                .create(&CreateFields {
                    labels: vec!["thread:t1".into()],
                    ..Default::default()
                })
                .unwrap();
        }
        store.close("hd-1", "read").unwrap();
        assert_eq!(store.list_by_thread("t1").unwrap().len(), 2);
    }

    #[test]
    fn unavailable_fails_everything() {
        let store = MemoryStore::default();
        store.set_unavailable(true);
        let err = store.list(&ListFilter::default()).unwrap_err();
        assert_eq!(
            crate::error::kind_of(&err),
            Some(crate::error::ErrorKind::Unavailable)
        );
    }

    #[test]
    fn timestamps_increase() {
        let store = MemoryStore::default();
        let a = store.create(&CreateFields::default()).unwrap();
        let b = store.create(&CreateFields::default()).unwrap();
        assert!(b.created_at > a.created_at);
    }
}
