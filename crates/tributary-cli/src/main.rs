mod adapters;
mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tributary",
    version,
    about = "Transactional streaming pipelines from a YAML file"
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
    /// Run a pipeline until its input ends or Ctrl-C
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// Validate pipeline configuration and resolve its components
    Check {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// List available inputs, transforms and outputs
    Components,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { pipeline } => commands::run::execute(&pipeline).await,
        Commands::Check { pipeline } => commands::check::execute(&pipeline),
        Commands::Components => {
            commands::components::execute();
            Ok(())
        }
    }
}
