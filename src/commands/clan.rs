use anyhow::Result;
use clap::Subcommand;

use super::{OutputFormat, Runtime, print_json, resolve_format};
use crate::clan::{AddOptions, ClanManager};

#[derive(Debug, Subcommand)]
pub enum ClanCommand {
    /// Create a persistent clan workspace
    Add {
        name: String,
        #[arg(long)]
        warband: Option<String>,
        /// Work on a `clan/<name>` branch instead of the default branch
        #[arg(long)]
        branch: bool,
    },
    /// List clan workers
    List {
        #[arg(long)]
        warband: Option<String>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Start a clan worker's session
    Start {
        name: String,
        #[arg(long)]
        warband: Option<String>,
    },
    /// Stop a clan worker's session
    Stop {
        name: String,
        #[arg(long)]
        warband: Option<String>,
    },
    /// Rename a clan worker
    Rename {
        old: String,
        new: String,
        #[arg(long)]
        warband: Option<String>,
    },
    /// Pull the clone and sync its issue store
    Pristine {
        name: String,
        #[arg(long)]
        warband: Option<String>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Delete a clan workspace
    Remove {
        name: String,
        #[arg(long)]
        warband: Option<String>,
        /// Remove even with uncommitted, stashed or unpushed work
        #[arg(long)]
        force: bool,
    },
}

impl ClanCommand {
    fn warband_arg(&self) -> Option<&str> {
        match self {
            ClanCommand::Add { warband, .. }
            | ClanCommand::List { warband, .. }
            | ClanCommand::Start { warband, .. }
            | ClanCommand::Stop { warband, .. }
            | ClanCommand::Rename { warband, .. }
            | ClanCommand::Pristine { warband, .. }
            | ClanCommand::Remove { warband, .. } => warband.as_deref(),
        }
    }

    pub fn execute(&self) -> Result<()> {
        let rt = Runtime::discover()?;
        let warband = rt.warband(self.warband_arg())?;
        let manager = ClanManager::new(
            &rt.encampment,
            &warband,
            &rt.vcs,
            &rt.stores,
            &rt.host,
            rt.settings.clone(),
        );

        match self {
            ClanCommand::Add { name, branch, .. } => {
                let state = manager.add(name, &AddOptions { create_branch: *branch })?;
                println!(
                    "Created clan worker {}/clan/{} on {} at {}",
                    warband.name,
                    state.name,
                    state.branch,
                    state.clone_path.display()
                );
                Ok(())
            }
            ClanCommand::List { format, .. } => {
                let states = manager.list()?;
                match resolve_format(*format) {
                    OutputFormat::Json => print_json(&states),
                    OutputFormat::Pretty | OutputFormat::Text => {
                        if states.is_empty() {
                            println!("No clan workers in {}", warband.name);
                        }
                        for s in &states {
                            println!("{}\t{}\t{}", s.name, s.branch, s.clone_path.display());
                        }
                        Ok(())
                    }
                }
            }
            ClanCommand::Start { name, .. } => {
                manager.start(name)?;
                println!("Session {} started", manager.session_name(name));
                Ok(())
            }
            ClanCommand::Stop { name, .. } => {
                if manager.stop(name)? {
                    println!("Session {} stopped", manager.session_name(name));
                } else {
                    println!("Session {} was not running", manager.session_name(name));
                }
                Ok(())
            }
            ClanCommand::Rename { old, new, .. } => {
                let state = manager.rename(old, new)?;
                println!("Renamed clan worker {old} to {}", state.name);
                Ok(())
            }
            ClanCommand::Pristine { name, format, .. } => {
                let result = manager.pristine(name)?;
                match resolve_format(*format) {
                    OutputFormat::Json => print_json(&result),
                    OutputFormat::Pretty | OutputFormat::Text => {
                        match &result.pull_error {
                            None => println!("pull: ok"),
                            Some(e) => println!("pull: failed ({e})"),
                        }
                        match &result.sync_error {
                            None => println!("sync: ok"),
                            Some(e) => println!("sync: failed ({e})"),
                        }
                        Ok(())
                    }
                }
            }
            ClanCommand::Remove { name, force, .. } => {
                manager.remove(name, *force)?;
                println!("Removed clan worker {name}");
                Ok(())
            }
        }
    }
}
