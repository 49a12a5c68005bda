//! Scoped schema editor.

use super::{Backend, BackendError};

/// A per-unit editing scope over a [`Backend`].
///
/// Opening the editor begins a backend scope; [`SchemaEditor::finish`]
/// commits it. Any other exit, including an early return through `?`,
/// rolls the scope back when the editor is dropped.
pub struct SchemaEditor<'a> {
    backend: &'a mut dyn Backend,
    atomic: bool,
    finished: bool,
    executed: usize,
}

impl<'a> SchemaEditor<'a> {
    /// Begin a scope on the backend.
    pub fn open(backend: &'a mut dyn Backend, atomic: bool) -> Result<Self, BackendError> {
        backend.begin(atomic)?;
        Ok(Self {
            backend,
            atomic,
            finished: false,
            executed: 0,
        })
    }

    /// Whether this scope runs inside a transaction.
    pub fn atomic(&self) -> bool {
        self.atomic
    }

    /// Number of statements run so far.
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Run one statement.
    pub fn execute(
        &mut self,
        statement: &str,
        params: &[serde_json::Value],
    ) -> Result<(), BackendError> {
        tracing::debug!(statement, params = params.len(), "executing statement");
        self.backend.execute(statement, params)?;
        self.executed += 1;
        Ok(())
    }

    /// Split a script into statements and run each one.
    pub fn execute_script(&mut self, script: &str) -> Result<(), BackendError> {
        for statement in split_statements(script) {
            self.execute(&statement, &[])?;
        }
        Ok(())
    }

    /// Commit the scope.
    pub fn finish(mut self) -> Result<(), BackendError> {
        self.finished = true;
        self.backend.commit()
    }
}

impl Drop for SchemaEditor<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.backend.rollback() {
            Ok(()) => tracing::warn!(
                executed = self.executed,
                "schema editor closed without commit, scope rolled back"
            ),
            Err(e) => tracing::warn!(error = %e, "rollback of schema editor scope failed"),
        }
    }
}

/// Split a script on `;` outside quoted text, dropping empty statements.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in script.chars() {
        match (quote, c) {
            (None, ';') => {
                push_statement(&mut statements, &current);
                current.clear();
                continue;
            }
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), _) if q == c => quote = None,
            _ => {}
        }
        current.push(c);
    }
    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
}
