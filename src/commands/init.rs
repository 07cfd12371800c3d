use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::encampment::Encampment;
use crate::store::relics::RelicsProvider;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Directory to create the encampment in (default: current directory)
    pub path: Option<PathBuf>,
    /// Encampment name (default: directory name)
    #[arg(long)]
    pub name: Option<String>,
}

impl InitArgs {
    pub fn execute(&self) -> Result<()> {
        let root = match self.path {
            Some(ref path) => path.clone(),
            None => std::env::current_dir()?,
        };
        let name = self.name.clone().unwrap_or_else(|| {
            root.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "encampment".to_string())
        });
        let camp = Encampment::init(&root, &name, &RelicsProvider::default())?;
        println!("Created encampment {name} at {}", camp.root().display());
        println!("Next: hd warband add <name> <git-url>");
        Ok(())
    }
}
