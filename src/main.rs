use std::process::ExitCode;

use clap::{Parser, Subcommand};

use horde::commands::clan::ClanCommand;
use horde::commands::drums::DrumsCommand;
use horde::commands::init::InitArgs;
use horde::commands::raider::RaiderCommand;
use horde::commands::rally::RallyArgs;
use horde::commands::warband::WarbandCommand;
use horde::commands::witness::WitnessCommand;
use horde::{config, error, telemetry};

#[derive(Debug, Parser)]
#[command(
    name = "hd",
    version,
    about = "Control plane for fleets of parallel AI coding agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create an encampment in a directory
    Init(InitArgs),
    /// Print role context for the current agent
    Rally(RallyArgs),
    /// Manage warbands (repositories under horde control)
    Warband {
        #[command(subcommand)]
        command: WarbandCommand,
    },
    /// Manage ephemeral raider workers
    Raider {
        #[command(subcommand)]
        command: RaiderCommand,
    },
    /// Manage persistent clan workspaces
    Clan {
        #[command(subcommand)]
        command: ClanCommand,
    },
    /// Send and read drums (agent mail)
    Drums {
        #[command(subcommand)]
        command: DrumsCommand,
    },
    /// Run the witness merge-protocol handlers
    Witness {
        #[command(subcommand)]
        command: WitnessCommand,
    },
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::Rally(_) => "rally",
            Self::Warband { .. } => "warband",
            Self::Raider { .. } => "raider",
            Self::Clan { .. } => "clan",
            Self::Drums { .. } => "drums",
            Self::Witness { .. } => "witness",
        }
    }

    /// Commands that only read state still run while horde is disabled.
    fn mutates(&self) -> bool {
        match self {
            Self::Rally(_) => false,
            Self::Warband { command } => !matches!(
                command,
                WarbandCommand::List { .. } | WarbandCommand::Show { .. }
            ),
            Self::Raider { command } => !matches!(
                command,
                RaiderCommand::List { .. } | RaiderCommand::Stale { .. }
            ),
            Self::Clan { command } => !matches!(command, ClanCommand::List { .. }),
            Self::Drums { command } => !matches!(
                command,
                DrumsCommand::Inbox { .. } | DrumsCommand::Search { .. } | DrumsCommand::Thread { .. }
            ),
            Self::Init(_) | Self::Witness { .. } => true,
        }
    }
}

fn main() -> ExitCode {
    let _telemetry = telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    if cli.command.mutates() && !config::horde_enabled() {
        println!("horde is disabled; `hd {}` did nothing", cli.command.name());
        return ExitCode::SUCCESS;
    }

    let result = match cli.command {
        Commands::Init(args) => args.execute(),
        Commands::Rally(args) => args.execute(),
        Commands::Warband { command } => command.execute(),
        Commands::Raider { command } => command.execute(),
        Commands::Clan { command } => command.execute(),
        Commands::Drums { command } => command.execute(),
        Commands::Witness { command } => command.execute(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            e.chain()
                .find_map(|cause| cause.downcast_ref::<error::HordeError>())
                .map_or(ExitCode::FAILURE, error::HordeError::exit_code)
        }
    }
}
