//! Template rendering for bootstrap files and session text.

use minijinja::Environment;
use serde::Serialize;

const MANAGED_START: &str = "<!-- horde:managed-start -->";
const MANAGED_END: &str = "<!-- horde:managed-end -->";

const RALLY_TEMPLATE: &str = include_str!("templates/rally.md.jinja");
const CLAN_README_TEMPLATE: &str = include_str!("templates/clan-readme.md.jinja");
const BEACON_TEMPLATE: &str = include_str!("templates/beacon.txt.jinja");
const PROPULSION_TEMPLATE: &str = include_str!("templates/propulsion.txt.jinja");
const AGENTS_MANAGED_TEMPLATE: &str = include_str!("templates/agents-managed.md.jinja");

/// Context for the per-agent bootstrap and session text.
#[derive(Debug, Clone, Serialize)]
pub struct AgentContext {
    pub role: String,
    pub warband: String,
    pub name: Option<String>,
    /// Drums address, e.g. `horde/raiders/toast`.
    pub address: String,
    pub store_dir: String,
    pub banner_bead: Option<String>,
}

#[derive(Debug, Serialize)]
struct BeaconContext<'a> {
    #[serde(flatten)]
    agent: &'a AgentContext,
    sender: &'a str,
    started_at: String,
}

#[derive(Debug, Serialize)]
struct WarbandContext<'a> {
    warband: &'a str,
}

fn render<S: Serialize>(name: &str, source: &str, ctx: &S) -> anyhow::Result<String> {
    let mut env = Environment::new();
    env.add_template(name, source)?;
    let template = env.get_template(name)?;
    Ok(template.render(ctx)?)
}

/// Fallback `RALLY.md` placed in an agent's store.
pub fn render_rally(ctx: &AgentContext) -> anyhow::Result<String> {
    let mut out = render("rally", RALLY_TEMPLATE, ctx)?;
    out.push('\n');
    Ok(out)
}

pub fn render_clan_readme(warband: &str) -> anyhow::Result<String> {
    let mut out = render("clan-readme", CLAN_README_TEMPLATE, &WarbandContext { warband })?;
    out.push('\n');
    Ok(out)
}

/// One-line startup beacon typed into a fresh session.
pub fn render_beacon(ctx: &AgentContext, sender: &str) -> anyhow::Result<String> {
    render(
        "beacon",
        BEACON_TEMPLATE,
        &BeaconContext {
            agent: ctx,
            sender,
            started_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        },
    )
}

/// Nudge sent once the agent is ready: a set banner is itself the instruction.
pub fn render_propulsion(ctx: &AgentContext) -> anyhow::Result<String> {
    render("propulsion", PROPULSION_TEMPLATE, ctx)
}

fn render_managed_section(warband: &str) -> anyhow::Result<String> {
    render("agents-managed", AGENTS_MANAGED_TEMPLATE, &WarbandContext { warband })
}

/// Complete `AGENTS.md` for a worktree whose repository ships none.
pub fn render_agents_md(warband: &str) -> anyhow::Result<String> {
    let managed = render_managed_section(warband)?;
    Ok(format!(
        "# {warband}\n\n<!-- Add project-specific context below: architecture, conventions, key files, etc. -->\n\n{MANAGED_START}\n{managed}\n{MANAGED_END}\n"
    ))
}

/// Replace the managed section of an existing `AGENTS.md`, appending one when
/// the markers are missing or out of order.
pub fn update_managed_section(content: &str, warband: &str) -> anyhow::Result<String> {
    let managed = render_managed_section(warband)?;
    let full_managed = format!("{MANAGED_START}\n{managed}\n{MANAGED_END}");

    if let Some(start_idx) = content.find(MANAGED_START)
        && let Some(end_idx) = content.find(MANAGED_END)
        && end_idx > start_idx
    {
        let before = &content[..start_idx];
        let after = &content[end_idx + MANAGED_END.len()..];
        return Ok(format!("{before}{full_managed}{after}"));
    }

    let temp = content.replace(MANAGED_START, "").replace(MANAGED_END, "");
    Ok(format!("{}\n\n{full_managed}\n", temp.trim_end()))
}
