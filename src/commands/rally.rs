use anyhow::Result;
use clap::Args;

use crate::drums::Address;
use crate::encampment::Encampment;
use crate::error::HordeError;
use crate::store::relics::Relics;
use crate::store::{agent, ids};
use crate::template::{self, AgentContext};
use crate::warband::Warband;

/// Print the caller's role context (what `RALLY.md` holds, freshly rendered).
#[derive(Debug, Args)]
pub struct RallyArgs {
    /// Agent address (default: from ACTOR or the current directory)
    #[arg(long)]
    pub identity: Option<String>,
    /// Print the propulsion nudge instead of the full context
    #[arg(long)]
    pub propulsion: bool,
}

impl RallyArgs {
    pub fn execute(&self) -> Result<()> {
        let camp = Encampment::discover()?;
        let identity = super::identity(self.identity.as_deref(), &camp);
        let ctx = context_for(&camp, &identity)?;
        if self.propulsion {
            println!("{}", template::render_propulsion(&ctx)?);
        } else {
            print!("{}", template::render_rally(&ctx)?);
        }
        Ok(())
    }
}

fn context_for(camp: &Encampment, identity: &str) -> Result<AgentContext> {
    let addr = Address::parse(identity)
        .ok_or_else(|| HordeError::Validation(format!("cannot rally unknown address {identity:?}")))?;
    let (role, name) = match addr {
        Address::Encampment { ref role } => {
            return Ok(AgentContext {
                role: role.clone(),
                warband: String::new(),
                name: None,
                address: addr.to_string(),
                store_dir: camp.store_dir().display().to_string(),
                banner_bead: None,
            });
        }
        Address::Singleton { ref role, .. } => (role.clone(), None),
        Address::Raider { ref name, .. } => ("raider".to_string(), Some(name.clone())),
        Address::Clan { ref name, .. } => ("clan".to_string(), Some(name.clone())),
    };
    let warband = Warband::load(camp, addr.warband().unwrap_or_default())?;
    let store_dir = warband.store_dir();
    let banner_bead = match (role.as_str(), name.as_deref()) {
        ("raider", Some(n)) => {
            let id = ids::raider_agent_id(warband.prefix(), &warband.name, n);
            let store = Relics::new(&store_dir);
            agent::agent_fields(&store, &id)
                .unwrap_or_else(|e| {
                    tracing::warn!(id = %id, error = %format!("{e:#}"), "agent record unreadable");
                    None
                })
                .and_then(|f| f.banner_bead)
        }
        _ => None,
    };
    Ok(AgentContext {
        role,
        warband: warband.name.clone(),
        name,
        address: addr.to_string(),
        store_dir: store_dir.display().to_string(),
        banner_bead,
    })
}
