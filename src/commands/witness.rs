use anyhow::Result;
use clap::Subcommand;

use super::{OutputFormat, Runtime, print_json, resolve_format};
use crate::drums::Router;
use crate::protocol::{Witness, process_inbox};
use crate::raider::RaiderManager;

#[derive(Debug, Subcommand)]
pub enum WitnessCommand {
    /// Process the witness inbox once
    Patrol {
        #[arg(long)]
        warband: Option<String>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
}

impl WitnessCommand {
    pub fn execute(&self) -> Result<()> {
        match self {
            WitnessCommand::Patrol { warband, format } => patrol(warband.as_deref(), *format),
        }
    }
}

fn patrol(warband: Option<&str>, format: Option<OutputFormat>) -> Result<()> {
    let rt = Runtime::discover()?;
    let warband = rt.warband(warband)?;
    let router = Router::new(&rt.encampment, &rt.stores).with_notifier(&rt.host);
    let raiders = RaiderManager::new(
        &rt.encampment,
        &warband,
        &rt.vcs,
        &rt.stores,
        &rt.host,
        rt.settings.clone(),
    );
    let witness = Witness::new(&router, &raiders, &warband.name);
    let mailbox = router.mailbox_for(&witness.address())?;
    let registry = witness.registry();
    let report = process_inbox(&mailbox, &registry)?;
    tracing::info!(
        warband = %warband.name,
        handled = report.handled.len(),
        skipped = report.skipped.len(),
        errors = report.errors.len(),
        "patrol complete"
    );

    match resolve_format(format) {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Pretty | OutputFormat::Text => {
            println!(
                "{}: {} handled, {} skipped, {} failed",
                witness.address(),
                report.handled.len(),
                report.skipped.len(),
                report.errors.len()
            );
            for (id, error) in &report.errors {
                println!("  {id}: {error}");
            }
            Ok(())
        }
    }
}
