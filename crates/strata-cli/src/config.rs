//! CLI configuration.

use crate::commands::Command;
use clap::Parser;
use std::path::PathBuf;

/// Default root holding one directory per app.
pub const DEFAULT_CHANGES_ROOT: &str = "./changes";

/// Default sled database path for the applied set and journal.
pub const DEFAULT_DATA_PATH: &str = "./data";

/// Default output verbosity.
pub const DEFAULT_VERBOSITY: u8 = 1;

/// Strata command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about = "Plan, apply and author schema changes")]
pub struct Args {
    /// Root directory holding `<app>/changes/*.json`
    #[arg(long, global = true, env = "STRATA_CHANGES", default_value = DEFAULT_CHANGES_ROOT)]
    pub changes: PathBuf,

    /// Path to the database storing the applied set
    #[arg(long, global = true, env = "STRATA_DATA", default_value = DEFAULT_DATA_PATH)]
    pub data: PathBuf,

    /// Output verbosity (0 = quiet, 1 = normal, 2 = timings, 3 = everything)
    #[arg(short = 'v', long, global = true, default_value_t = DEFAULT_VERBOSITY)]
    pub verbosity: u8,

    /// Never prompt; take the default answer to every question
    #[arg(long, global = true)]
    pub no_input: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Resolved configuration shared by every command.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Root directory of the change files.
    pub changes_root: PathBuf,
    /// Database path.
    pub data_path: PathBuf,
    /// Whether prompts may be shown.
    pub interactive: bool,
    /// Output verbosity.
    pub verbosity: u8,
}

impl CliConfig {
    /// Configuration with the default paths.
    pub fn new() -> Self {
        Self {
            changes_root: PathBuf::from(DEFAULT_CHANGES_ROOT),
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            interactive: true,
            verbosity: DEFAULT_VERBOSITY,
        }
    }

    /// Set the changes root.
    pub fn with_changes_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.changes_root = root.into();
        self
    }

    /// Set the database path.
    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = path.into();
        self
    }

    /// Enable or disable prompts.
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Set the verbosity.
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Args {
    /// Split into the shared configuration and the command to run.
    pub fn into_config(self) -> (CliConfig, Command) {
        let config = CliConfig::new()
            .with_changes_root(self.changes)
            .with_data_path(self.data)
            .with_interactive(!self.no_input)
            .with_verbosity(self.verbosity);
        (config, self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apply() {
        let args = Args::try_parse_from([
            "strata", "--data", "/tmp/db", "apply", "blog", "zero", "--fake", "--no-input",
        ])
        .unwrap();
        let (config, command) = args.into_config();
        assert_eq!(config.data_path, PathBuf::from("/tmp/db"));
        assert!(!config.interactive);
        assert_eq!(config.verbosity, DEFAULT_VERBOSITY);
        let Command::Apply(apply) = command else {
            panic!("expected apply");
        };
        assert_eq!(apply.app.as_deref(), Some("blog"));
        assert_eq!(apply.name.as_deref(), Some("zero"));
        assert!(apply.fake);
        assert!(!apply.plan);
    }

    #[test]
    fn test_parse_make() {
        let args =
            Args::try_parse_from(["strata", "make", "blog", "shop", "--dry-run", "-n", "tidy"])
                .unwrap();
        let (config, command) = args.into_config();
        assert!(config.interactive);
        let Command::Make(make) = command else {
            panic!("expected make");
        };
        assert_eq!(make.apps, vec!["blog", "shop"]);
        assert!(make.dry_run);
        assert!(!make.merge);
        assert_eq!(make.name.as_deref(), Some("tidy"));
    }
}
