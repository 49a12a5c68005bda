//! Change engine error types.

use super::ChangeKey;
use crate::backend::BackendError;
use crate::state::StateError;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Errors raised while loading, planning or running changes.
#[derive(Debug, Error)]
pub enum ChangeError {
    /// A change references a node that is not in the graph.
    #[error("{}", describe_missing(.node, .origin.as_ref()))]
    NodeNotFound {
        /// The missing node.
        node: ChangeKey,
        /// The change whose dependency list referenced it.
        origin: Option<ChangeKey>,
    },

    /// A change was inserted twice.
    #[error("change {node} is already part of the graph")]
    DuplicateNode {
        /// The duplicated node.
        node: ChangeKey,
    },

    /// The dependency graph contains a cycle.
    #[error("circular dependency: {}", join_keys(.cycle))]
    CircularDependency {
        /// The nodes on the cycle, starting and ending with the same key.
        cycle: Vec<ChangeKey>,
    },

    /// An applied change has a dependency that is not applied.
    #[error("change {change} is applied before its dependency {dependency}")]
    InconsistentHistory {
        /// The applied change.
        change: ChangeKey,
        /// Its unapplied dependency.
        dependency: ChangeKey,
    },

    /// Apps with more than one leaf change.
    #[error(
        "conflicting changes detected; multiple leaf nodes in the change graph: ({})",
        describe_conflicts(.conflicts)
    )]
    Conflicts {
        /// Conflicting leaf names per app.
        conflicts: BTreeMap<String, BTreeSet<String>>,
    },

    /// More than one change matches a name prefix.
    #[error("there is more than one change for '{app}' with the prefix '{prefix}'")]
    Ambiguity {
        /// App searched.
        app: String,
        /// The prefix given.
        prefix: String,
    },

    /// No change matches a name or prefix.
    #[error("there is no change for '{app}' matching '{name}'")]
    ChangeNotFound {
        /// App searched.
        app: String,
        /// The name or prefix given.
        name: String,
    },

    /// A symbolic dependency names an app nobody knows.
    #[error("dependency on unknown app: {app}")]
    UnknownApp {
        /// The unknown app.
        app: String,
    },

    /// A symbolic dependency names an app that has no changes yet.
    #[error("dependency on app with no changes: {app}")]
    EmptyAppDependency {
        /// The empty app.
        app: String,
    },

    /// A backward run reached an operation without a backward form.
    #[error("operation '{operation}' in {target} is not reversible")]
    Irreversible {
        /// The change (or app) that owns the operation.
        target: String,
        /// Description of the operation.
        operation: String,
    },

    /// The plan mixes forward and backward steps.
    #[error(
        "change plans with both forwards and backwards steps are not supported; \
         split the request into separate forwards and backwards plans"
    )]
    MixedPlan,

    /// A change definition could not be read.
    #[error("change {name} in app {app} is unreadable: {reason}")]
    BadChange {
        /// App owning the change.
        app: String,
        /// Change name.
        name: String,
        /// Why it could not be read.
        reason: String,
    },

    /// A procedural operation names code that is not registered.
    #[error("procedure '{name}' is not registered")]
    UnknownProcedure {
        /// The procedure name.
        name: String,
    },

    /// The branches of a conflict share no ancestor.
    #[error("could not find a common ancestor of {} in app {app}", .names.join(", "))]
    NoCommonAncestor {
        /// App being merged.
        app: String,
        /// The conflicting leaves.
        names: Vec<String>,
    },

    /// The applied-set storage could not be created.
    #[error("unable to create the applied change store: {reason}")]
    SchemaMissing {
        /// Underlying cause.
        reason: String,
    },

    /// State projection error.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Backend error.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::Error),
}

impl ChangeError {
    /// Whether this error reflects a broken or tampered set of changes.
    ///
    /// Structural errors are raised before any backend work starts.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ChangeError::NodeNotFound { .. }
                | ChangeError::DuplicateNode { .. }
                | ChangeError::CircularDependency { .. }
                | ChangeError::InconsistentHistory { .. }
                | ChangeError::Conflicts { .. }
        )
    }
}

fn describe_missing(node: &ChangeKey, origin: Option<&ChangeKey>) -> String {
    match origin {
        Some(origin) => format!("change {origin} references nonexistent node {node}"),
        None => format!("node {node} is not a valid node"),
    }
}

fn join_keys(keys: &[ChangeKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn describe_conflicts(conflicts: &BTreeMap<String, BTreeSet<String>>) -> String {
    conflicts
        .iter()
        .map(|(app, names)| {
            format!(
                "{} in {app}",
                names.iter().cloned().collect::<Vec<_>>().join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}
