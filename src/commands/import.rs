// ABOUTME: `grid-sync import` runs a query and prints the result as a grid document
// ABOUTME: Output is the same JSON format `export` reads

use anyhow::{bail, Context, Result};
use clap::Args;
use std::time::Duration;

use crate::config::DEFAULT_TIMEOUT_SECONDS;
use crate::grid::GridDocument;
use crate::import::ImportSource;
use crate::postgres::ConnectOptions;

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Source PostgreSQL URL
    #[arg(long, env = "GRID_SYNC_CONNECTION", hide_env_values = true)]
    pub connection: String,
    /// Query whose result becomes the grid
    #[arg(long)]
    pub query: String,
    /// Maximum number of rows to read
    #[arg(long)]
    pub limit: Option<usize>,
    /// Connection and statement timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECONDS)]
    pub timeout: i64,
    /// Accept self-signed server certificates
    #[arg(long)]
    pub accept_invalid_certs: bool,
}

pub async fn command(args: ImportArgs) -> Result<()> {
    if args.timeout <= 0 {
        bail!("--timeout must be greater than zero, got {}", args.timeout);
    }
    crate::utils::validate_connection_string(&args.connection)?;

    let options = ConnectOptions {
        timeout: Duration::from_secs(args.timeout as u64),
        accept_invalid_certs: args.accept_invalid_certs,
    };
    let mut source = ImportSource::new(args.connection, options);
    if let Some(limit) = args.limit {
        source = source.with_limit(limit);
    }

    let grid = source.fetch(&args.query).await?;
    let document = GridDocument::from_grid(grid);
    let json =
        serde_json::to_string_pretty(&document).context("Failed to serialize imported grid")?;
    source.close();

    println!("{}", json);
    Ok(())
}
