//! The backend seam: where change-units touch a live store.
//!
//! The core never generates commands itself. It hands the literal statements
//! carried by operations to a [`Backend`] inside a [`SchemaEditor`] scope
//! opened once per change-unit.

mod editor;
mod journal;

pub use editor::{split_statements, SchemaEditor};
pub use journal::{JournalBackend, JournalEntry};

use thiserror::Error;

/// A failure reported by a backend while running a statement.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BackendError {
    /// Create an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<sled::Error> for BackendError {
    fn from(err: sled::Error) -> Self {
        BackendError::with_source("journal storage failure", err)
    }
}

/// A live store that change-units are applied to.
///
/// Calls are synchronous and block for their duration. One run uses a
/// backend at a time.
pub trait Backend {
    /// Start a scope for one change-unit. `atomic` asks for a transaction;
    /// some statements cannot run inside one.
    fn begin(&mut self, atomic: bool) -> Result<(), BackendError>;

    /// Run one statement with optional parameters.
    fn execute(&mut self, statement: &str, params: &[serde_json::Value]) -> Result<(), BackendError>;

    /// Make the work of the current scope durable.
    fn commit(&mut self) -> Result<(), BackendError>;

    /// Discard the work of the current scope where the backend can.
    fn rollback(&mut self) -> Result<(), BackendError>;
}
