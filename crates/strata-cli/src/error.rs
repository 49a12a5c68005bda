//! CLI errors.

use std::collections::{BTreeMap, BTreeSet};
use strata_core::ChangeError;
use thiserror::Error;

/// Errors reported by the `strata` binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// The change engine refused or failed.
    #[error(transparent)]
    Change(#[from] ChangeError),

    /// Storage or file error from the core.
    #[error(transparent)]
    Core(#[from] strata_core::Error),

    /// The database could not be opened.
    #[error("cannot open database: {0}")]
    Database(#[from] sled::Error),

    /// The app has no directory under the changes root.
    #[error("App '{0}' could not be found under the changes root.")]
    UnknownApp(String),

    /// The app exists but has no changes.
    #[error("App '{0}' does not have changes.")]
    NoChanges(String),

    /// More than one leaf in some app.
    #[error(
        "Conflicting changes detected; multiple leaf nodes in the graph: ({0}).\n\
         To fix them run 'strata make --merge'"
    )]
    Conflicts(String),

    /// `make` was called without apps.
    #[error("Specify at least one app, or use --merge.")]
    NoApps,
}

impl CliError {
    /// Conflict error listing every conflicting app.
    pub fn conflicts(conflicts: &BTreeMap<String, BTreeSet<String>>) -> Self {
        let details = conflicts
            .iter()
            .map(|(app, names)| {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                format!("{} in {app}", names.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");
        CliError::Conflicts(details)
    }
}
