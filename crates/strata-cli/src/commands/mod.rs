//! `strata` subcommands.

pub mod apply;
pub mod make;

use crate::config::CliConfig;
use crate::error::CliError;
use clap::Subcommand;

pub use apply::ApplyArgs;
pub use make::MakeArgs;

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bring the database to a target, applying or unapplying changes
    Apply(ApplyArgs),
    /// Create new change files
    Make(MakeArgs),
}

impl Command {
    /// Run the command.
    pub fn run(self, config: &CliConfig) -> Result<(), CliError> {
        match self {
            Command::Apply(args) => apply::run(config, args),
            Command::Make(args) => make::run(config, args),
        }
    }
}
