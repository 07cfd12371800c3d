//! Agent and role records.
//!
//! Agent records are never hard-deleted: the store keeps tombstones for deleted
//! ids, which would block recreating the same agent. Removal closes the record
//! and clears its mutable fields; the next muster reopens it.

use super::fields::{AgentFields, AgentState, CleanupStatus, RoleConfig};
use super::{CreateFields, Issue, IssueStore, UpdatePatch, ids};

pub const AGENT_TYPE: &str = "agent";
pub const AGENT_LABEL: &str = "kind:agent";
pub const ROLE_TYPE: &str = "role";
pub const ROLE_LABEL: &str = "kind:role";

/// Every role that gets an encampment-level definition record.
pub const ROLES: &[&str] = &["warchief", "shaman", "witness", "forge", "raider", "clan"];

fn agent_labels(fields: &AgentFields) -> Vec<String> {
    let mut labels = vec![AGENT_LABEL.to_string()];
    if !fields.role_type.is_empty() {
        labels.push(format!("role:{}", fields.role_type));
    }
    if !fields.warband.is_empty() {
        labels.push(format!("warband:{}", fields.warband));
    }
    labels
}

/// Create the agent record `id`, or reopen and rewrite it when it already exists.
pub fn create_or_reopen_agent_bead(
    store: &dyn IssueStore,
    id: &str,
    title: &str,
    fields: &AgentFields,
) -> anyhow::Result<Issue> {
    match store.find(id)? {
        Some(existing) => {
            if existing.is_closed() {
                store.reopen(id, "re-mustered")?;
            }
            store.update(
                id,
                &UpdatePatch {
                    title: Some(title.to_string()),
                    description: Some(fields.apply_to(&existing.description)),
                    ..Default::default()
                },
            )?;
            for label in agent_labels(fields) {
                if !existing.has_label(&label) {
                    store.label_add(id, &label)?;
                }
            }
            tracing::debug!(id, "agent record reopened");
            store.show(id)
        }
        None => {
            let issue = store.create(&CreateFields {
                id: Some(id.to_string()),
                title: title.to_string(),
                description: fields.format(),
                issue_type: AGENT_TYPE.to_string(),
                labels: agent_labels(fields),
                ..Default::default()
            })?;
            tracing::debug!(id, "agent record created");
            Ok(issue)
        }
    }
}

/// Clear mutable fields and close. A missing record is not an error.
pub fn close_and_clear_agent_bead(store: &dyn IssueStore, id: &str, reason: &str) -> anyhow::Result<()> {
    let Some(existing) = store.find(id)? else {
        return Ok(());
    };
    let cleared = AgentFields::parse(&existing.description).cleared();
    store.update(
        id,
        &UpdatePatch {
            description: Some(cleared.apply_to(&existing.description)),
            ..Default::default()
        },
    )?;
    if existing.is_closed() {
        return Ok(());
    }
    store.close(id, reason)
}

/// Parsed fields of an agent record, open or closed.
pub fn agent_fields(store: &dyn IssueStore, id: &str) -> anyhow::Result<Option<AgentFields>> {
    Ok(store.find(id)?.map(|issue| AgentFields::parse(&issue.description)))
}

fn modify(
    store: &dyn IssueStore,
    id: &str,
    change: impl FnOnce(&mut AgentFields),
) -> anyhow::Result<()> {
    let existing = store.show(id)?;
    let mut fields = AgentFields::parse(&existing.description);
    change(&mut fields);
    store.update(
        id,
        &UpdatePatch {
            description: Some(fields.apply_to(&existing.description)),
            ..Default::default()
        },
    )
}

pub fn update_agent_state(store: &dyn IssueStore, id: &str, state: AgentState) -> anyhow::Result<()> {
    modify(store, id, |f| f.agent_state = Some(state))
}

pub fn update_cleanup_status(
    store: &dyn IssueStore,
    id: &str,
    status: CleanupStatus,
) -> anyhow::Result<()> {
    modify(store, id, |f| f.cleanup_status = Some(status))
}

pub fn set_banner_bead(store: &dyn IssueStore, id: &str, banner: Option<&str>) -> anyhow::Result<()> {
    modify(store, id, |f| f.banner_bead = banner.map(str::to_string))
}

pub fn set_active_mr(store: &dyn IssueStore, id: &str, mr: Option<&str>) -> anyhow::Result<()> {
    modify(store, id, |f| f.active_mr = mr.map(str::to_string))
}

/// Make sure every role has its `hq-<role>-role` definition. Returns how many were created.
pub fn ensure_role_beads(store: &dyn IssueStore) -> anyhow::Result<usize> {
    let mut created = 0;
    for role in ROLES {
        let id = ids::role_bead_id(role);
        if store.find(&id)?.is_some() {
            continue;
        }
        store.create(&CreateFields {
            id: Some(id),
            title: format!("{role} role"),
            description: RoleConfig::for_role(role).format(),
            issue_type: ROLE_TYPE.to_string(),
            labels: vec![ROLE_LABEL.to_string(), format!("role:{role}")],
            ..Default::default()
        })?;
        created += 1;
    }
    Ok(created)
}

/// Role definition for `role`, falling back to the built-in one.
pub fn role_config(store: &dyn IssueStore, role: &str) -> anyhow::Result<RoleConfig> {
    Ok(match store.find(&ids::role_bead_id(role))? {
        Some(issue) => RoleConfig::parse(&issue.description),
        None => RoleConfig::for_role(role),
    })
}
