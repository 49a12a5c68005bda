//! Journal backend - records executed statements in sled.

use super::{Backend, BackendError};
use crate::clock::current_timestamp;
use crate::error::Error;
use serde::{Deserialize, Serialize};

/// One executed statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// The statement text.
    pub statement: String,
    /// Statement parameters.
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
    /// When the statement ran (microseconds since epoch).
    pub executed_at: u64,
}

/// A backend that appends every committed statement to a sled tree.
///
/// Atomic scopes buffer their statements and write them in one batch on
/// commit; rollback discards the buffer. Non-atomic scopes write each
/// statement as it runs.
pub struct JournalBackend {
    db: sled::Db,
    tree: sled::Tree,
    pending: Vec<JournalEntry>,
    atomic: bool,
}

impl JournalBackend {
    /// Tree name for the journal.
    pub const TREE_NAME: &'static str = "strata:journal";

    /// Open or create the journal.
    pub fn open(db: &sled::Db) -> Result<Self, Error> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self {
            db: db.clone(),
            tree,
            pending: Vec::new(),
            atomic: false,
        })
    }

    /// All committed entries in execution order.
    pub fn entries(&self) -> Result<Vec<JournalEntry>, Error> {
        let mut entries = Vec::new();
        for result in self.tree.iter() {
            let (_, value) = result?;
            let entry = serde_json::from_slice(&value)
                .map_err(|e| Error::Deserialization(e.to_string()))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Statements buffered in the current atomic scope.
    pub fn pending(&self) -> &[JournalEntry] {
        &self.pending
    }

    fn write(&self, batch: &mut sled::Batch, entry: &JournalEntry) -> Result<(), BackendError> {
        let id = self.db.generate_id()?;
        let value = serde_json::to_vec(entry)
            .map_err(|e| BackendError::with_source("cannot encode journal entry", e))?;
        batch.insert(id.to_be_bytes().to_vec(), value);
        Ok(())
    }
}

impl Backend for JournalBackend {
    fn begin(&mut self, atomic: bool) -> Result<(), BackendError> {
        self.atomic = atomic;
        self.pending.clear();
        Ok(())
    }

    fn execute(&mut self, statement: &str, params: &[serde_json::Value]) -> Result<(), BackendError> {
        let entry = JournalEntry {
            statement: statement.to_string(),
            params: params.to_vec(),
            executed_at: current_timestamp(),
        };
        if self.atomic {
            self.pending.push(entry);
            return Ok(());
        }
        let mut batch = sled::Batch::default();
        self.write(&mut batch, &entry)?;
        self.tree.apply_batch(batch)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        let mut batch = sled::Batch::default();
        for entry in &self.pending {
            self.write(&mut batch, entry)?;
        }
        self.tree.apply_batch(batch)?;
        self.tree.flush()?;
        self.pending.clear();
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), BackendError> {
        self.pending.clear();
        Ok(())
    }
}
