//! Change-units and their identity.

use super::operation::{Operation, ProcedureRegistry};
use super::ChangeError;
use crate::backend::SchemaEditor;
use crate::state::SchemaState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Sentinel name meaning "the first unit of an app".
pub const FIRST: &str = "__first__";

/// Sentinel name meaning "the latest unit of an app".
pub const LATEST: &str = "__latest__";

/// Identity of a change-unit: `(app, name)`.
///
/// Serialized as a two element array, `["auth", "0001_initial"]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct ChangeKey {
    /// The owning app.
    pub app: String,
    /// The unit name within the app.
    pub name: String,
}

impl ChangeKey {
    /// Create a key.
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
        }
    }

    /// The `__first__` sentinel for an app.
    pub fn first(app: impl Into<String>) -> Self {
        Self::new(app, FIRST)
    }

    /// The `__latest__` sentinel for an app.
    pub fn latest(app: impl Into<String>) -> Self {
        Self::new(app, LATEST)
    }

    /// Whether the name is one of the sentinels.
    pub fn is_symbolic(&self) -> bool {
        self.name == FIRST || self.name == LATEST
    }
}

impl From<(String, String)> for ChangeKey {
    fn from((app, name): (String, String)) -> Self {
        Self { app, name }
    }
}

impl From<ChangeKey> for (String, String) {
    fn from(key: ChangeKey) -> Self {
        (key.app, key.name)
    }
}

impl fmt::Display for ChangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app, self.name)
    }
}

fn default_atomic() -> bool {
    true
}

/// A named, ordered bundle of operations plus its dependency metadata.
///
/// Units are plain data; equality and hashing use the key only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeUnit {
    /// The owning app. Discovery fills it in when absent.
    #[serde(default)]
    pub app: String,
    /// Unit name, usually `NNNN_label`. Discovery fills it in when absent.
    #[serde(default)]
    pub name: String,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Whether this is the first unit of its app.
    #[serde(default)]
    pub initial: bool,
    /// Whether the unit runs inside one backend transaction.
    #[serde(default = "default_atomic")]
    pub atomic: bool,
    /// Units that must run before this one. May hold sentinels.
    #[serde(default)]
    pub dependencies: Vec<ChangeKey>,
    /// Units this one must run before.
    #[serde(default)]
    pub run_before: Vec<ChangeKey>,
    /// Operations in execution order.
    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl PartialEq for ChangeUnit {
    fn eq(&self, other: &Self) -> bool {
        self.app == other.app && self.name == other.name
    }
}

impl Eq for ChangeUnit {}

impl Hash for ChangeUnit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.app.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for ChangeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app, self.name)
    }
}

impl ChangeUnit {
    /// Create an empty unit.
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
            description: String::new(),
            initial: false,
            atomic: true,
            dependencies: Vec::new(),
            run_before: Vec::new(),
            operations: Vec::new(),
        }
    }

    /// Add a dependency.
    pub fn depends_on(mut self, key: ChangeKey) -> Self {
        self.dependencies.push(key);
        self
    }

    /// Add a run-before hint.
    pub fn runs_before(mut self, key: ChangeKey) -> Self {
        self.run_before.push(key);
        self
    }

    /// Append an operation.
    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark as the first unit of the app.
    pub fn initial(mut self, initial: bool) -> Self {
        self.initial = initial;
        self
    }

    /// Set the transaction policy.
    pub fn atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    /// The unit's key.
    pub fn key(&self) -> ChangeKey {
        ChangeKey::new(self.app.as_str(), self.name.as_str())
    }

    /// Apply every operation's state effect in place.
    pub fn mutate_state(&self, state: &mut SchemaState) -> Result<(), ChangeError> {
        for operation in &self.operations {
            operation.state_forwards(&self.app, state)?;
        }
        Ok(())
    }

    /// Return a mutated copy of `state`, leaving it untouched.
    pub fn mutated(&self, state: &SchemaState) -> Result<SchemaState, ChangeError> {
        let mut next = state.clone();
        self.mutate_state(&mut next)?;
        Ok(next)
    }

    /// Run the unit forwards, mutating `state` as each operation completes.
    pub fn apply(
        &self,
        state: &mut SchemaState,
        editor: &mut SchemaEditor<'_>,
        procedures: &ProcedureRegistry,
    ) -> Result<(), ChangeError> {
        for operation in &self.operations {
            let before = state.clone();
            operation.state_forwards(&self.app, state)?;
            operation.database_forwards(&self.app, editor, &before, state, procedures)?;
        }
        Ok(())
    }

    /// Fail with `Irreversible` if any operation lacks a backward form.
    pub fn check_reversible(&self) -> Result<(), ChangeError> {
        match self.operations.iter().find(|op| !op.reversible()) {
            Some(operation) => Err(ChangeError::Irreversible {
                target: self.to_string(),
                operation: operation.describe(),
            }),
            None => Ok(()),
        }
    }

    /// Run the unit backwards from `state`, the schema as it stood just
    /// before this unit historically ran. Returns that same state.
    pub fn unapply(
        &self,
        state: &SchemaState,
        editor: &mut SchemaEditor<'_>,
        procedures: &ProcedureRegistry,
    ) -> Result<SchemaState, ChangeError> {
        self.check_reversible()?;

        // Backward operations need the state on each side of them.
        let mut steps = Vec::with_capacity(self.operations.len());
        let mut current = state.clone();
        for operation in &self.operations {
            let before = current.clone();
            operation.state_forwards(&self.app, &mut current)?;
            steps.push((operation, before, current.clone()));
        }

        for (operation, before, after) in steps.iter().rev() {
            operation.database_backwards(&self.app, editor, after, before, procedures)?;
        }
        Ok(state.clone())
    }
}
