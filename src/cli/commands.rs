use clap::Subcommand;

use super::run::RunArgs;
use super::validate::ValidateArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run leads through flows with the dry-run driver
    Run(RunArgs),

    /// Load and check flow documents
    Validate(ValidateArgs),
}
