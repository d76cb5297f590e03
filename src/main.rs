// ABOUTME: CLI entry point for grid-sync
// ABOUTME: Parses commands and routes to the export, import, and check-config handlers

use clap::{Parser, Subcommand};
use grid_sync::commands::{self, CheckConfigArgs, ExportArgs, ImportArgs};

#[derive(Parser)]
#[command(name = "grid-sync")]
#[command(about = "Synchronize grid tables with PostgreSQL tables", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Log level (error, warn, info, debug, trace). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a grid document into a PostgreSQL table
    Export(ExportArgs),
    /// Run a query and print its result as a grid document
    Import(ImportArgs),
    /// Validate an export configuration without connecting
    CheckConfig(CheckConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Export(args) => commands::export::command(args).await,
        Commands::Import(args) => commands::import::command(args).await,
        Commands::CheckConfig(args) => commands::check_config::command(args).await,
    }
}
