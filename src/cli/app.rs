use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{effective_level, init_logging, load_config};

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    let loaded = load_config(cli.config.as_deref())?;
    let level = effective_level(&loaded.config, cli.log_level.as_deref(), cli.debug).to_string();
    let _log_guard = init_logging(&loaded.config.log, &level)?;

    info!("Starting LeadFlow v{}", env!("CARGO_PKG_VERSION"));
    match &loaded.path {
        Some(path) => info!(path = %path.display(), "Loaded configuration"),
        None => info!("No configuration file found, using defaults"),
    }

    let ctx = CliContext::new(loaded.config, loaded.path, cli.output);
    match dispatch(&cli, &ctx).await {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
