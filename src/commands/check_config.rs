// ABOUTME: `grid-sync check-config` validates an export configuration offline
// ABOUTME: Reports the resolved plan without connecting to the destination

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use crate::config::ExportConfig;
use crate::utils::strip_password_from_url;

#[derive(Args, Debug)]
pub struct CheckConfigArgs {
    /// Path to the export configuration (TOML)
    #[arg(long)]
    pub config: PathBuf,
}

pub async fn command(args: CheckConfigArgs) -> Result<()> {
    let config = ExportConfig::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    let plan = config
        .validate()
        .with_context(|| format!("Invalid config {}", args.config.display()))?;

    println!("Configuration is valid");
    println!(
        "  destination: {}",
        strip_password_from_url(&plan.connection_string)?
    );
    println!("  table:       {}", plan.table);
    println!("  mode:        {}", plan.mode);
    println!("  timeout:     {}s", plan.timeout.as_secs());
    if let Some(hook) = &plan.pre_hook {
        println!("  pre-hook:    {}", hook);
    }
    if let Some(hook) = &plan.post_hook {
        println!("  post-hook:   {}", hook);
    }
    Ok(())
}
