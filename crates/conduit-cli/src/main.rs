mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "conduit",
    version,
    about = "Batch data integration engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job
    Run {
        /// Path to job YAML file
        job: PathBuf,
        /// Validate and pre-check connectors without moving any data
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate job configuration and run connector pre-checks
    Check {
        /// Path to job YAML file
        job: PathBuf,
    },
    /// List built-in connectors
    Connectors,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    let code = match cli.command {
        Commands::Run { job, dry_run } => commands::run::execute(&job, dry_run)?,
        Commands::Check { job } => {
            commands::check::execute(&job)?;
            0
        }
        Commands::Connectors => {
            commands::connectors::execute();
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
