//! Strata Command-Line Client
//!
//! Applies, unapplies and authors schema changes stored as JSON files.

mod commands;
mod config;
mod error;
mod questioner;

use clap::Parser;
use config::Args;

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strata=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let (config, command) = args.into_config();

    tracing::debug!(
        changes_root = %config.changes_root.display(),
        data_path = %config.data_path.display(),
        interactive = config.interactive,
        "configuration loaded"
    );

    if let Err(e) = command.run(&config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
