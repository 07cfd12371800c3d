use anyhow::Result;
use clap::Subcommand;

use super::{OutputFormat, Runtime, print_json, resolve_format};
use crate::raider::{AddOptions, RaiderManager, RemoveOptions};

#[derive(Debug, Subcommand)]
pub enum RaiderCommand {
    /// Muster a raider (a name is drawn from the pool when omitted)
    Add {
        name: Option<String>,
        #[arg(long)]
        warband: Option<String>,
        /// Issue to hang on the raider's banner
        #[arg(long)]
        banner: Option<String>,
        /// Start the session once the worktree is ready
        #[arg(long)]
        start: bool,
    },
    /// List raiders and their derived state
    List {
        #[arg(long)]
        warband: Option<String>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Remove a raider's worktree, branch and session
    Remove {
        name: String,
        #[arg(long)]
        warband: Option<String>,
        /// Discard uncommitted changes
        #[arg(long)]
        force: bool,
        /// Skip every safety check
        #[arg(long)]
        nuclear: bool,
    },
    /// Report raiders that are safe to reap
    Stale {
        #[arg(long)]
        warband: Option<String>,
        /// Commits behind the default branch that make a raider stale
        #[arg(long)]
        threshold: Option<u32>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Delete raider branches no worktree has checked out
    PruneBranches {
        #[arg(long)]
        warband: Option<String>,
    },
    /// Flag a raider as stuck and needing help
    Stuck {
        name: String,
        #[arg(long)]
        warband: Option<String>,
    },
    /// Clear a raider's banner and report it done
    Done {
        name: String,
        #[arg(long)]
        warband: Option<String>,
    },
    /// Start (or restart) a raider's session
    Start {
        name: String,
        #[arg(long)]
        warband: Option<String>,
    },
}

impl RaiderCommand {
    fn warband_arg(&self) -> Option<&str> {
        match self {
            RaiderCommand::Add { warband, .. }
            | RaiderCommand::List { warband, .. }
            | RaiderCommand::Remove { warband, .. }
            | RaiderCommand::Stale { warband, .. }
            | RaiderCommand::PruneBranches { warband }
            | RaiderCommand::Stuck { warband, .. }
            | RaiderCommand::Done { warband, .. }
            | RaiderCommand::Start { warband, .. } => warband.as_deref(),
        }
    }

    pub fn execute(&self) -> Result<()> {
        let rt = Runtime::discover()?;
        let warband = rt.warband(self.warband_arg())?;
        let manager = RaiderManager::new(
            &rt.encampment,
            &warband,
            &rt.vcs,
            &rt.stores,
            &rt.host,
            rt.settings.clone(),
        );

        match self {
            RaiderCommand::Add { name, banner, start, .. } => {
                let name = match name {
                    Some(name) => name.clone(),
                    None => manager.allocate_name()?,
                };
                let raider = manager.add(
                    &name,
                    &AddOptions {
                        banner_bead: banner.clone(),
                    },
                )?;
                println!(
                    "Mustered {} on {} at {}",
                    crate::raider::address(&warband.name, &raider.name),
                    raider.branch,
                    raider.clone_path.display()
                );
                if *start {
                    manager.start(&raider.name)?;
                    println!("Session {} started", manager.session_name(&raider.name));
                }
                Ok(())
            }
            RaiderCommand::List { format, .. } => {
                let raiders = manager.list()?;
                match resolve_format(*format) {
                    OutputFormat::Json => print_json(&raiders),
                    OutputFormat::Pretty | OutputFormat::Text => {
                        if raiders.is_empty() {
                            println!("No raiders in {}", warband.name);
                        }
                        for r in &raiders {
                            println!(
                                "{}\t{}\t{}\t{}",
                                r.name,
                                r.state.as_str(),
                                r.banner_bead.as_deref().unwrap_or("-"),
                                r.branch
                            );
                        }
                        Ok(())
                    }
                }
            }
            RaiderCommand::Remove {
                name, force, nuclear, ..
            } => {
                manager.remove(
                    name,
                    RemoveOptions {
                        force: *force,
                        nuclear: *nuclear,
                    },
                )?;
                println!("Removed raider {name}");
                Ok(())
            }
            RaiderCommand::Stale {
                threshold, format, ..
            } => {
                let infos = match threshold {
                    Some(t) => manager.detect_stale_with(*t)?,
                    None => manager.detect_stale()?,
                };
                match resolve_format(*format) {
                    OutputFormat::Json => print_json(&infos),
                    OutputFormat::Pretty | OutputFormat::Text => {
                        for info in &infos {
                            let verdict = if info.stale { "stale" } else { "keep" };
                            println!("{}\t{verdict}\t{}", info.name, info.reason);
                        }
                        Ok(())
                    }
                }
            }
            RaiderCommand::PruneBranches { .. } => {
                let deleted = manager.cleanup_stale_branches()?;
                println!("Deleted {deleted} stale raider branch(es)");
                Ok(())
            }
            RaiderCommand::Stuck { name, .. } => {
                manager.mark_stuck(name)?;
                println!("Raider {name} marked stuck");
                Ok(())
            }
            RaiderCommand::Done { name, .. } => {
                manager.clear_issue(name)?;
                println!("Raider {name} reported done");
                Ok(())
            }
            RaiderCommand::Start { name, .. } => {
                manager.start(name)?;
                println!("Session {} started", manager.session_name(name));
                Ok(())
            }
        }
    }
}
