use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use super::{OutputFormat, Runtime, print_json, resolve_format};
use crate::warband::{AddOptions, Warband, WarbandManager};

#[derive(Debug, Subcommand)]
pub enum WarbandCommand {
    /// Add a repository as a new warband
    Add {
        /// Warband name (letters, digits and underscores)
        name: String,
        /// Git URL to clone
        git_url: String,
        /// Local clone to borrow objects from
        #[arg(long)]
        local_repo: Option<PathBuf>,
        /// Issue id prefix (default: derived from the name)
        #[arg(long)]
        prefix: Option<String>,
    },
    /// List registered warbands
    List {
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Show one warband's configuration
    Show {
        name: String,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Unregister a warband (files are left on disk)
    Remove { name: String },
}

#[derive(Debug, Serialize)]
struct WarbandSummary {
    name: String,
    path: PathBuf,
    git_url: String,
    default_branch: String,
    prefix: String,
    store_dir: PathBuf,
}

impl From<&Warband> for WarbandSummary {
    fn from(w: &Warband) -> Self {
        Self {
            name: w.name.clone(),
            path: w.path.clone(),
            git_url: w.config.git_url.clone(),
            default_branch: w.default_branch().to_string(),
            prefix: w.prefix().to_string(),
            store_dir: w.store_dir(),
        }
    }
}

impl WarbandCommand {
    pub fn execute(&self) -> Result<()> {
        let rt = Runtime::discover()?;
        let manager = WarbandManager::new(&rt.encampment, &rt.vcs, &rt.stores);
        match self {
            WarbandCommand::Add {
                name,
                git_url,
                local_repo,
                prefix,
            } => {
                let warband = manager.add(&AddOptions {
                    name: name.clone(),
                    git_url: git_url.clone(),
                    local_repo: local_repo.clone(),
                    prefix: prefix.clone(),
                })?;
                println!(
                    "Added warband {} (prefix {}-, branch {})",
                    warband.name,
                    warband.prefix(),
                    warband.default_branch()
                );
                Ok(())
            }
            WarbandCommand::List { format } => {
                let summaries: Vec<WarbandSummary> = manager.list()?.iter().map(WarbandSummary::from).collect();
                match resolve_format(*format) {
                    OutputFormat::Json => print_json(&summaries),
                    OutputFormat::Pretty | OutputFormat::Text => {
                        if summaries.is_empty() {
                            println!("No warbands. Add one with: hd warband add <name> <git-url>");
                        }
                        for s in &summaries {
                            println!("{}\t{}-\t{}\t{}", s.name, s.prefix, s.default_branch, s.git_url);
                        }
                        Ok(())
                    }
                }
            }
            WarbandCommand::Show { name, format } => {
                let warband = manager.get(name)?;
                match resolve_format(*format) {
                    OutputFormat::Json => print_json(&WarbandSummary::from(&warband)),
                    OutputFormat::Pretty | OutputFormat::Text => {
                        let s = WarbandSummary::from(&warband);
                        println!("Warband:  {}", s.name);
                        println!("Path:     {}", s.path.display());
                        println!("Repo:     {}", s.git_url);
                        println!("Branch:   {}", s.default_branch);
                        println!("Prefix:   {}-", s.prefix);
                        println!("Store:    {}", s.store_dir.display());
                        Ok(())
                    }
                }
            }
            WarbandCommand::Remove { name } => {
                manager.remove(name)?;
                println!("Unregistered warband {name}; its directory was left in place");
                Ok(())
            }
        }
    }
}
