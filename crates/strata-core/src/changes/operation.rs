//! Operations: the mutation primitives a change-unit is made of.

use super::ChangeError;
use crate::backend::{BackendError, SchemaEditor};
use crate::state::{SchemaState, StateOperation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One literal backend statement, optionally with parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Statement {
    /// A bare statement.
    Plain(String),
    /// A statement and its parameters, written as `["...", [1, 2]]`.
    WithParams(String, Vec<Value>),
}

/// The command payload of a [`Operation::BackendCommand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Statements {
    /// A script split on `;` before running. Empty means no-op.
    Script(String),
    /// Statements run one by one, unsplit.
    List(Vec<Statement>),
}

impl Statements {
    fn run(&self, editor: &mut SchemaEditor<'_>) -> Result<(), BackendError> {
        match self {
            Statements::Script(script) => editor.execute_script(script),
            Statements::List(statements) => {
                for statement in statements {
                    match statement {
                        Statement::Plain(text) => editor.execute(text, &[])?,
                        Statement::WithParams(text, params) => editor.execute(text, params)?,
                    }
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Statements {
    fn from(script: &str) -> Self {
        Statements::Script(script.to_string())
    }
}

impl From<String> for Statements {
    fn from(script: String) -> Self {
        Statements::Script(script)
    }
}

/// Code run by a procedural operation.
pub type Procedure =
    Arc<dyn Fn(&mut SchemaEditor<'_>, &SchemaState) -> Result<(), BackendError> + Send + Sync>;

/// Named procedures that [`Operation::ProceduralCode`] refers to.
#[derive(Clone, Default)]
pub struct ProcedureRegistry {
    procedures: HashMap<String, Procedure>,
}

impl ProcedureRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a procedure under a name, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, procedure: F)
    where
        F: Fn(&mut SchemaEditor<'_>, &SchemaState) -> Result<(), BackendError> + Send + Sync + 'static,
    {
        self.procedures.insert(name.into(), Arc::new(procedure));
    }

    /// Builder form of [`ProcedureRegistry::register`].
    pub fn with<F>(mut self, name: impl Into<String>, procedure: F) -> Self
    where
        F: Fn(&mut SchemaEditor<'_>, &SchemaState) -> Result<(), BackendError> + Send + Sync + 'static,
    {
        self.register(name, procedure);
        self
    }

    /// Look up a procedure.
    pub fn get(&self, name: &str) -> Option<&Procedure> {
        self.procedures.get(name)
    }

    fn call(
        &self,
        name: &str,
        editor: &mut SchemaEditor<'_>,
        state: &SchemaState,
    ) -> Result<(), ChangeError> {
        let procedure = self.get(name).ok_or_else(|| ChangeError::UnknownProcedure {
            name: name.to_string(),
        })?;
        (**procedure)(editor, state)?;
        Ok(())
    }
}

impl fmt::Debug for ProcedureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.procedures.keys().collect();
        names.sort();
        f.debug_struct("ProcedureRegistry")
            .field("procedures", &names)
            .finish()
    }
}

/// A single mutation primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Literal backend commands.
    BackendCommand {
        /// Commands run forwards.
        forward: Statements,
        /// Commands run backwards; `None` makes the operation irreversible.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backward: Option<Statements>,
        /// The state effect of the commands, which cannot be read from them.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        state_operations: Vec<StateOperation>,
    },
    /// Registered procedures run against the live schema.
    ProceduralCode {
        /// Procedure run forwards.
        code: String,
        /// Procedure run backwards; `None` makes the operation irreversible.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reverse_code: Option<String>,
    },
}

impl Operation {
    /// An irreversible backend command.
    pub fn run_command(forward: impl Into<Statements>) -> Self {
        Operation::BackendCommand {
            forward: forward.into(),
            backward: None,
            state_operations: Vec::new(),
        }
    }

    /// A backend command with a backward form.
    pub fn reversible_command(forward: impl Into<Statements>, backward: impl Into<Statements>) -> Self {
        Operation::BackendCommand {
            forward: forward.into(),
            backward: Some(backward.into()),
            state_operations: Vec::new(),
        }
    }

    /// Attach state operations to a backend command. No effect on procedures.
    pub fn with_state_operations(mut self, operations: Vec<StateOperation>) -> Self {
        if let Operation::BackendCommand {
            state_operations, ..
        } = &mut self
        {
            *state_operations = operations;
        }
        self
    }

    /// An irreversible procedure.
    pub fn run_procedure(code: impl Into<String>) -> Self {
        Operation::ProceduralCode {
            code: code.into(),
            reverse_code: None,
        }
    }

    /// A procedure with a backward form.
    pub fn reversible_procedure(code: impl Into<String>, reverse_code: impl Into<String>) -> Self {
        Operation::ProceduralCode {
            code: code.into(),
            reverse_code: Some(reverse_code.into()),
        }
    }

    /// Whether a backward form was supplied.
    pub fn reversible(&self) -> bool {
        match self {
            Operation::BackendCommand { backward, .. } => backward.is_some(),
            Operation::ProceduralCode { reverse_code, .. } => reverse_code.is_some(),
        }
    }

    /// Apply the state effect. Pure: no backend access.
    pub fn state_forwards(&self, app: &str, state: &mut SchemaState) -> Result<(), ChangeError> {
        if let Operation::BackendCommand {
            state_operations, ..
        } = self
        {
            for operation in state_operations {
                operation.state_forwards(app, state)?;
            }
        }
        Ok(())
    }

    /// Run forwards against the backend.
    pub fn database_forwards(
        &self,
        _app: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &SchemaState,
        _to_state: &SchemaState,
        procedures: &ProcedureRegistry,
    ) -> Result<(), ChangeError> {
        match self {
            Operation::BackendCommand { forward, .. } => forward.run(editor)?,
            Operation::ProceduralCode { code, .. } => procedures.call(code, editor, from_state)?,
        }
        Ok(())
    }

    /// Run backwards against the backend, from `from_state` (after this
    /// operation) to `to_state` (before it).
    pub fn database_backwards(
        &self,
        app: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &SchemaState,
        _to_state: &SchemaState,
        procedures: &ProcedureRegistry,
    ) -> Result<(), ChangeError> {
        match self {
            Operation::BackendCommand {
                backward: Some(backward),
                ..
            } => backward.run(editor)?,
            Operation::ProceduralCode {
                reverse_code: Some(reverse_code),
                ..
            } => procedures.call(reverse_code, editor, from_state)?,
            _ => {
                return Err(ChangeError::Irreversible {
                    target: app.to_string(),
                    operation: self.describe(),
                })
            }
        }
        Ok(())
    }

    /// Human-readable description.
    pub fn describe(&self) -> String {
        match self {
            Operation::BackendCommand { .. } => "Raw backend command".to_string(),
            Operation::ProceduralCode { code, .. } => format!("Raw procedural code: {code}"),
        }
    }
}
