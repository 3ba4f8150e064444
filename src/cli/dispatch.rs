use super::context::CliContext;
use super::env::CliArgs;
use super::run::cmd_run;
use super::validate::cmd_validate;
use crate::cli::commands::Commands;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Run(args) => cmd_run(args, ctx).await,
        Commands::Validate(args) => cmd_validate(args, ctx).await,
    }
}
