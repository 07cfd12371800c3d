//! `bd` CLI backend for [`IssueStore`].
//!
//! Every invocation exports `RELICS_DIR` (and `BD_ACTOR` when known) so the CLI
//! never auto-discovers a store outside the one we resolved.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{
    ACTOR_ENV, CreateFields, Issue, IssueStore, ListFilter, STORE_DIR_ENV, StoreProvider,
    UpdatePatch,
};
use crate::error::HordeError;
use crate::subprocess::{RunOutput, Tool};

const BD: &str = "bd";
const TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Relics {
    store_dir: PathBuf,
    work_dir: PathBuf,
    actor: Option<String>,
}

impl Relics {
    /// Handle for the store at `store_dir` (a resolved `.store` directory).
    pub fn new(store_dir: &Path) -> Self {
        let work_dir = store_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| store_dir.to_path_buf());
        Self {
            store_dir: store_dir.to_path_buf(),
            work_dir,
            actor: std::env::var(ACTOR_ENV).ok().filter(|a| !a.is_empty()),
        }
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = Some(actor.to_string());
        self
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    fn tool(&self) -> Tool {
        let mut tool = Tool::new(BD)
            .dir(&self.work_dir)
            .timeout(TIMEOUT)
            .env(STORE_DIR_ENV, &self.store_dir.to_string_lossy());
        if let Some(ref actor) = self.actor {
            tool = tool.env(ACTOR_ENV, actor);
        }
        tool
    }

    fn run(&self, tool: Tool) -> anyhow::Result<RunOutput> {
        let output = tool.run().map_err(normalize_spawn_error)?;
        if output.success() {
            Ok(output)
        } else {
            Err(classify_failure(&output.stderr, output.exit_code))
        }
    }
}

/// Map a failed `bd` run onto the normalized error kinds.
fn classify_failure(stderr: &str, code: i32) -> anyhow::Error {
    let message = stderr.trim().to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("not found") || lower.contains("no issue") || lower.contains("does not exist")
    {
        HordeError::NotFound(message).into()
    } else if lower.contains("database is locked")
        || lower.contains("resource temporarily unavailable")
        || lower.contains("timed out")
    {
        HordeError::Transient(message).into()
    } else {
        HordeError::ToolFailed {
            tool: BD.to_string(),
            code,
            message,
        }
        .into()
    }
}

/// Spawn failures other than a missing binary surface as `Unavailable`.
fn normalize_spawn_error(err: anyhow::Error) -> anyhow::Error {
    if err.downcast_ref::<HordeError>().is_some() {
        err
    } else {
        HordeError::Unavailable(format!("{err:#}")).into()
    }
}

/// `bd show --json` prints either an object or a one-element array.
fn parse_show(stdout: &str, id: &str) -> anyhow::Result<Issue> {
    let value: serde_json::Value = serde_json::from_str(stdout)
        .map_err(|e| HordeError::Unavailable(format!("parsing bd show {id}: {e}")))?;
    let value = match value {
        serde_json::Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        serde_json::Value::Array(_) => return Err(HordeError::NotFound(format!("issue {id}")).into()),
        other => other,
    };
    serde_json::from_value(value)
        .map_err(|e| HordeError::Unavailable(format!("parsing bd show {id}: {e}")).into())
}

fn list_args(filter: &ListFilter) -> Vec<String> {
    let mut args = vec!["list".to_string(), "--json".to_string()];
    if let Some(ref t) = filter.issue_type {
        args.push(format!("--type={t}"));
    }
    if let Some(ref s) = filter.status {
        args.push(format!("--status={s}"));
    } else if filter.all {
        args.push("--all".to_string());
    }
    if let Some(p) = filter.priority {
        args.push(format!("--priority={p}"));
    }
    if let Some(ref a) = filter.assignee {
        args.push(format!("--assignee={a}"));
    }
    if let Some(ref l) = filter.label {
        args.push(format!("--label={l}"));
    }
    args
}

fn create_args(fields: &CreateFields) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--json".to_string(),
        format!("--title={}", fields.title),
    ];
    if let Some(ref id) = fields.id {
        args.push(format!("--id={id}"));
    }
    if !fields.description.is_empty() {
        args.push(format!("--description={}", fields.description));
    }
    if !fields.issue_type.is_empty() {
        args.push(format!("--type={}", fields.issue_type));
    }
    if let Some(p) = fields.priority {
        args.push(format!("--priority={p}"));
    }
    if let Some(ref a) = fields.assignee {
        args.push(format!("--assignee={a}"));
    }
    if !fields.labels.is_empty() {
        args.push(format!("--labels={}", fields.labels.join(",")));
    }
    if let Some(ref actor) = fields.actor {
        args.push(format!("--actor={actor}"));
    }
    args
}

fn update_args(id: &str, patch: &UpdatePatch) -> Vec<String> {
    let mut args = vec!["update".to_string(), id.to_string()];
    if let Some(ref t) = patch.title {
        args.push(format!("--title={t}"));
    }
    if let Some(ref d) = patch.description {
        args.push(format!("--description={d}"));
    }
    if let Some(ref s) = patch.status {
        args.push(format!("--status={s}"));
    }
    if let Some(p) = patch.priority {
        args.push(format!("--priority={p}"));
    }
    if let Some(ref a) = patch.assignee {
        args.push(format!("--assignee={a}"));
    }
    args
}

fn strs(args: &[String]) -> Vec<&str> {
    args.iter().map(String::as_str).collect()
}

impl IssueStore for Relics {
    fn list(&self, filter: &ListFilter) -> anyhow::Result<Vec<Issue>> {
        let args = list_args(filter);
        let output = self.run(self.tool().args(&strs(&args)))?;
        if output.stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        output
            .parse_json()
            .map_err(|e| HordeError::Unavailable(format!("parsing bd list: {e:#}")).into())
    }

    fn show(&self, id: &str) -> anyhow::Result<Issue> {
        let output = self.run(self.tool().args(&["show", id, "--json"]))?;
        parse_show(&output.stdout, id)
    }

    fn create(&self, fields: &CreateFields) -> anyhow::Result<Issue> {
        let args = create_args(fields);
        let output = self.run(self.tool().args(&strs(&args)))?;
        output
            .parse_json()
            .map_err(|e| HordeError::Unavailable(format!("parsing bd create: {e:#}")).into())
    }

    fn update(&self, id: &str, patch: &UpdatePatch) -> anyhow::Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let args = update_args(id, patch);
        self.run(self.tool().args(&strs(&args))).map(|_| ())
    }

    fn close(&self, id: &str, reason: &str) -> anyhow::Result<()> {
        let reason = format!("--reason={reason}");
        self.run(self.tool().args(&["close", id, &reason])).map(|_| ())
    }

    fn reopen(&self, id: &str, reason: &str) -> anyhow::Result<()> {
        let reason = format!("--reason={reason}");
        self.run(self.tool().args(&["reopen", id, &reason])).map(|_| ())
    }

    fn label_add(&self, id: &str, label: &str) -> anyhow::Result<()> {
        self.run(self.tool().args(&["label", "add", id, label])).map(|_| ())
    }

    fn label_remove(&self, id: &str, label: &str) -> anyhow::Result<()> {
        self.run(self.tool().args(&["label", "remove", id, label]))
            .map(|_| ())
    }

    fn init(&self, prefix: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.store_dir).map_err(|e| {
            HordeError::Unavailable(format!("creating {}: {e}", self.store_dir.display()))
        })?;
        let prefix = format!("--prefix={prefix}");
        self.run(self.tool().args(&["init", &prefix, "--quiet"]))
            .map(|_| ())
    }

    fn sync(&self) -> anyhow::Result<()> {
        self.run(self.tool().arg("sync")).map(|_| ())
    }
}

/// Opens [`Relics`] handles, optionally stamping an actor.
#[derive(Debug, Clone, Default)]
pub struct RelicsProvider {
    pub actor: Option<String>,
}

impl StoreProvider for RelicsProvider {
    fn open<'a>(&'a self, store_dir: &Path) -> Box<dyn IssueStore + 'a> {
        let relics = Relics::new(store_dir);
        match self.actor {
            Some(ref actor) => Box::new(relics.with_actor(actor)),
            None => Box::new(relics),
        }
    }
}
