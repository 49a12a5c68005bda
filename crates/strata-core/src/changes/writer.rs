//! Rendering change-units to files.

use super::ChangeUnit;
use crate::discovery::CHANGES_DIR;
use crate::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes one unit to `<root>/<app>/changes/<name>.json`.
#[derive(Debug, Clone)]
pub struct ChangeWriter<'a> {
    change: &'a ChangeUnit,
    root: PathBuf,
}

impl<'a> ChangeWriter<'a> {
    /// Create a writer for a unit under a changes root.
    pub fn new(change: &'a ChangeUnit, root: impl Into<PathBuf>) -> Self {
        Self {
            change,
            root: root.into(),
        }
    }

    /// The unit as pretty JSON.
    pub fn as_string(&self) -> Result<String, Error> {
        let mut text = serde_json::to_string_pretty(self.change)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        text.push('\n');
        Ok(text)
    }

    /// File name of the unit.
    pub fn filename(&self) -> String {
        format!("{}.json", self.change.name)
    }

    /// Directory holding the app's changes.
    pub fn directory(&self) -> PathBuf {
        self.root.join(&self.change.app).join(CHANGES_DIR)
    }

    /// Full path of the unit file.
    pub fn path(&self) -> PathBuf {
        self.directory().join(self.filename())
    }

    /// Write the unit, creating the directory if needed.
    pub fn write(&self) -> Result<PathBuf, Error> {
        let text = self.as_string()?;
        let directory = self.directory();
        fs::create_dir_all(&directory)?;
        let path = directory.join(self.filename());
        fs::write(&path, text)?;
        Ok(path)
    }

    /// The changes root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
