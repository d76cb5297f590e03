// ABOUTME: `grid-sync export` loads a config and a grid document and runs one export
// ABOUTME: Command-line flags override the matching config file settings

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use crate::config::ExportConfig;
use crate::grid::GridDocument;

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Path to the export configuration (TOML)
    #[arg(long)]
    pub config: PathBuf,
    /// Path to the grid document (JSON)
    #[arg(long)]
    pub grid: PathBuf,
    /// Destination PostgreSQL URL
    #[arg(long, env = "GRID_SYNC_CONNECTION", hide_env_values = true)]
    pub connection: Option<String>,
    /// Destination table as "schema.table"
    #[arg(long)]
    pub table: Option<String>,
    /// Sync mode, e.g. "Update & Insert"
    #[arg(long)]
    pub mode: Option<String>,
    /// Connection and statement timeout in seconds
    #[arg(long)]
    pub timeout: Option<i64>,
    /// Stored routine to call before the write
    #[arg(long)]
    pub pre_hook: Option<String>,
    /// Stored routine to call after the merge
    #[arg(long)]
    pub post_hook: Option<String>,
    /// Pattern used to render timestamps as text
    #[arg(long)]
    pub date_format: Option<String>,
    /// Leave a grid column out of the export (repeatable)
    #[arg(long = "disable-column", value_name = "COLUMN")]
    pub disable_columns: Vec<String>,
}

impl ExportArgs {
    fn apply_overrides(&self, config: &mut ExportConfig) {
        if let Some(connection) = &self.connection {
            config.connection_string = connection.clone();
        }
        if let Some(table) = &self.table {
            config.table = table.clone();
        }
        if let Some(mode) = &self.mode {
            config.mode = mode.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout_seconds = timeout;
        }
        if let Some(hook) = &self.pre_hook {
            config.pre_hook = Some(hook.clone());
        }
        if let Some(hook) = &self.post_hook {
            config.post_hook = Some(hook.clone());
        }
        if let Some(pattern) = &self.date_format {
            config.date_format = pattern.clone();
        }
        for column in &self.disable_columns {
            config.columns.insert(column.clone(), false);
        }
    }
}

pub async fn command(args: ExportArgs) -> Result<()> {
    let mut config = ExportConfig::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    args.apply_overrides(&mut config);

    let document = GridDocument::load(&args.grid)?;
    let key_columns: Vec<&str> = document
        .columns
        .iter()
        .filter(|c| c.is_key)
        .map(|c| c.name.as_str())
        .collect();
    tracing::debug!(
        "Loaded {} rows, key columns: {:?}",
        document.rows.len(),
        key_columns
    );
    let grid = document.into_grid();

    let summary = crate::export::export(&config, &grid).await?;

    println!(
        "Exported to {} ({}): {} staged, {} written, {} deleted in {:.2}s{}",
        summary.table,
        summary.mode,
        summary.rows_staged,
        summary.rows_affected,
        summary.rows_deleted,
        summary.elapsed.as_secs_f64(),
        if summary.table_created {
            " (table created)"
        } else {
            ""
        }
    );
    Ok(())
}
