//! Persistence of the applied set.

use super::{ChangeError, ChangeKey};
use crate::clock::current_timestamp;
use crate::error::Error;
use parking_lot::Mutex;
use rkyv::{Archive, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

/// The store recording which units have run against a backend.
///
/// Each write touches one key and happens only after the backend work for
/// that unit has committed.
pub trait Recorder {
    /// Create the backing storage if it does not exist yet. Idempotent.
    fn ensure_schema(&self) -> Result<(), ChangeError>;

    /// Keys of every applied unit. Empty if the storage was never created.
    fn applied(&self) -> Result<BTreeSet<ChangeKey>, ChangeError>;

    /// Record a unit as applied.
    fn record_applied(&self, app: &str, name: &str) -> Result<(), ChangeError>;

    /// Record a unit as unapplied.
    fn record_unapplied(&self, app: &str, name: &str) -> Result<(), ChangeError>;

    /// Remove every record.
    fn flush(&self) -> Result<(), ChangeError>;
}

/// One applied-unit record.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct AppliedRecord {
    /// The app.
    pub app: String,
    /// The unit name.
    pub name: String,
    /// When the unit was applied (microseconds since epoch).
    pub applied_at: u64,
}

impl AppliedRecord {
    /// Create a record stamped with the current time.
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
            applied_at: current_timestamp(),
        }
    }

    /// The unit key.
    pub fn key(&self) -> ChangeKey {
        ChangeKey::new(self.app.as_str(), self.name.as_str())
    }

    /// Serialize the record to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ChangeError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| ChangeError::Storage(Error::Serialization(e.to_string())))
    }

    /// Deserialize a record from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChangeError> {
        let mut aligned: rkyv::util::AlignedVec<16> = rkyv::util::AlignedVec::new();
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| ChangeError::Storage(Error::Deserialization(e.to_string())))
    }
}

fn storage(err: sled::Error) -> ChangeError {
    ChangeError::Storage(Error::Storage(err))
}

/// Applied set kept in a sled tree.
///
/// The tree is created on first write, never on read.
pub struct SledRecorder {
    db: sled::Db,
    tree: OnceLock<sled::Tree>,
}

impl SledRecorder {
    /// Tree name for applied records.
    pub const TREE_NAME: &'static str = "strata:applied";

    /// Wrap a database. Nothing is created until the first write.
    pub fn new(db: &sled::Db) -> Self {
        Self {
            db: db.clone(),
            tree: OnceLock::new(),
        }
    }

    /// Whether the backing tree exists.
    pub fn has_schema(&self) -> bool {
        self.tree.get().is_some()
            || self
                .db
                .tree_names()
                .iter()
                .any(|name| &**name == Self::TREE_NAME.as_bytes())
    }

    fn tree(&self) -> Result<&sled::Tree, ChangeError> {
        if let Some(tree) = self.tree.get() {
            return Ok(tree);
        }
        let tree = self
            .db
            .open_tree(Self::TREE_NAME)
            .map_err(|e| ChangeError::SchemaMissing {
                reason: e.to_string(),
            })?;
        Ok(self.tree.get_or_init(|| tree))
    }

    fn record_key(app: &str, name: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(app.len() + name.len() + 1);
        key.extend_from_slice(app.as_bytes());
        key.push(0);
        key.extend_from_slice(name.as_bytes());
        key
    }

    /// Every stored record, ordered by key.
    pub fn applied_records(&self) -> Result<Vec<AppliedRecord>, ChangeError> {
        if !self.has_schema() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for result in self.tree()?.iter() {
            let (_, value) = result.map_err(storage)?;
            records.push(AppliedRecord::from_bytes(&value)?);
        }
        Ok(records)
    }
}

impl Recorder for SledRecorder {
    fn ensure_schema(&self) -> Result<(), ChangeError> {
        self.tree().map(|_| ())
    }

    fn applied(&self) -> Result<BTreeSet<ChangeKey>, ChangeError> {
        Ok(self
            .applied_records()?
            .iter()
            .map(AppliedRecord::key)
            .collect())
    }

    fn record_applied(&self, app: &str, name: &str) -> Result<(), ChangeError> {
        let tree = self.tree()?;
        let record = AppliedRecord::new(app, name);
        tree.insert(Self::record_key(app, name), record.to_bytes()?)
            .map_err(storage)?;
        tree.flush().map_err(storage)?;
        Ok(())
    }

    fn record_unapplied(&self, app: &str, name: &str) -> Result<(), ChangeError> {
        let tree = self.tree()?;
        tree.remove(Self::record_key(app, name)).map_err(storage)?;
        tree.flush().map_err(storage)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), ChangeError> {
        let tree = self.tree()?;
        tree.clear().map_err(storage)?;
        tree.flush().map_err(storage)?;
        Ok(())
    }
}

/// In-process applied set.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    applied: Mutex<BTreeMap<ChangeKey, AppliedRecord>>,
}

impl MemoryRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a recorder that already holds some keys.
    pub fn with_applied<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = ChangeKey>,
    {
        let applied = keys
            .into_iter()
            .map(|key| {
                let record = AppliedRecord::new(key.app.as_str(), key.name.as_str());
                (key, record)
            })
            .collect();
        Self {
            applied: Mutex::new(applied),
        }
    }
}

impl Recorder for MemoryRecorder {
    fn ensure_schema(&self) -> Result<(), ChangeError> {
        Ok(())
    }

    fn applied(&self) -> Result<BTreeSet<ChangeKey>, ChangeError> {
        Ok(self.applied.lock().keys().cloned().collect())
    }

    fn record_applied(&self, app: &str, name: &str) -> Result<(), ChangeError> {
        self.applied
            .lock()
            .insert(ChangeKey::new(app, name), AppliedRecord::new(app, name));
        Ok(())
    }

    fn record_unapplied(&self, app: &str, name: &str) -> Result<(), ChangeError> {
        self.applied.lock().remove(&ChangeKey::new(app, name));
        Ok(())
    }

    fn flush(&self) -> Result<(), ChangeError> {
        self.applied.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    #[test]
    fn test_record_roundtrip_bytes() {
        let record = AppliedRecord::new("auth", "0001_initial");
        let bytes = record.to_bytes().unwrap();
        assert_eq!(AppliedRecord::from_bytes(&bytes).unwrap(), record);
    }

    #[test]
    fn test_sled_recorder_is_lazy() {
        let db = temp_db();
        let recorder = SledRecorder::new(&db);

        assert!(!recorder.has_schema());
        assert!(recorder.applied().unwrap().is_empty());
        assert!(!recorder.has_schema());

        recorder.ensure_schema().unwrap();
        recorder.ensure_schema().unwrap();
        assert!(recorder.has_schema());
    }

    #[test]
    fn test_sled_recorder_applied_set() {
        let db = temp_db();
        let recorder = SledRecorder::new(&db);

        recorder.record_applied("auth", "0001_initial").unwrap();
        recorder.record_applied("auth", "0002_email").unwrap();
        recorder.record_applied("blog", "0001_initial").unwrap();
        recorder.record_unapplied("auth", "0002_email").unwrap();

        let applied = recorder.applied().unwrap();
        assert_eq!(
            applied,
            BTreeSet::from([
                ChangeKey::new("auth", "0001_initial"),
                ChangeKey::new("blog", "0001_initial"),
            ])
        );

        // A second handle on the same database sees the records.
        let reopened = SledRecorder::new(&db);
        assert!(reopened.has_schema());
        assert_eq!(reopened.applied_records().unwrap().len(), 2);

        reopened.flush().unwrap();
        assert!(recorder.applied().unwrap().is_empty());
    }

    #[test]
    fn test_memory_recorder() {
        let recorder = MemoryRecorder::with_applied([ChangeKey::new("a", "0001")]);
        recorder.record_applied("a", "0002").unwrap();
        recorder.record_unapplied("a", "0001").unwrap();

        assert_eq!(
            recorder.applied().unwrap(),
            BTreeSet::from([ChangeKey::new("a", "0002")])
        );
        recorder.flush().unwrap();
        assert!(recorder.applied().unwrap().is_empty());
    }
}
