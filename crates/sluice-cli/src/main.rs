//! Sluice CLI entrypoint.

use clap::Parser;
use sluice_core::run::RunStatus;
use tracing_subscriber::EnvFilter;

mod commands;
mod handlers;

use commands::Commands;

#[derive(Parser)]
#[command(name = "sluice")]
#[command(author, version, about = "Workflow orchestration for CI job graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => handlers::validate(&path).await?,
        Commands::Run(args) => {
            let status = handlers::run_workflow(args).await?;
            if status != RunStatus::Succeeded {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
