//! Discovery of change-units per app.
//!
//! The loader asks a [`Discovery`] for the apps it knows and, per app, for
//! the units it can find. An app with no units at all is `Unchanged`: its
//! live schema is taken as it is.

use crate::changes::{ChangeError, ChangeUnit};
use crate::error::Error;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory holding an app's change files.
pub const CHANGES_DIR: &str = "changes";

/// What discovery found for one app.
#[derive(Debug, Clone)]
pub enum Discovered {
    /// The app has no change storage; its schema is used as-is.
    Unchanged,
    /// The app's units keyed by name. May be empty.
    Changes(BTreeMap<String, ChangeUnit>),
}

/// Source of change-units.
pub trait Discovery {
    /// Every app, in a stable order.
    fn apps(&self) -> Result<Vec<String>, ChangeError>;

    /// The units of one app.
    fn discover(&self, app: &str) -> Result<Discovered, ChangeError>;
}

/// Whether a file name is skipped by discovery.
fn is_ignored(name: &str) -> bool {
    name.starts_with(['_', '.', '~'])
}

/// Reads `<root>/<app>/changes/*.json`.
///
/// Each subdirectory of the root is an app. An app directory without a
/// `changes/` directory is unchanged. A unit takes its name from the file
/// stem and its app from the directory.
#[derive(Debug, Clone)]
pub struct DirectoryDiscovery {
    root: PathBuf,
}

impl DirectoryDiscovery {
    /// Discover under a root directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_unit(app: &str, name: &str, path: &Path) -> Result<ChangeUnit, ChangeError> {
        let bad = |reason: String| ChangeError::BadChange {
            app: app.to_string(),
            name: name.to_string(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| bad(e.to_string()))?;
        let mut unit: ChangeUnit = serde_json::from_str(&text).map_err(|e| bad(e.to_string()))?;

        if !unit.app.is_empty() && unit.app != app {
            return Err(bad(format!("declares app '{}'", unit.app)));
        }
        unit.app = app.to_string();
        unit.name = name.to_string();
        Ok(unit)
    }
}

impl Discovery for DirectoryDiscovery {
    fn apps(&self) -> Result<Vec<String>, ChangeError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut apps = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(Error::from)? {
            let entry = entry.map_err(Error::from)?;
            if !entry.file_type().map_err(Error::from)?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !is_ignored(name) {
                    apps.push(name.to_string());
                }
            }
        }
        apps.sort();
        Ok(apps)
    }

    fn discover(&self, app: &str) -> Result<Discovered, ChangeError> {
        let dir = self.root.join(app).join(CHANGES_DIR);
        if !dir.is_dir() {
            return Ok(Discovered::Unchanged);
        }

        let mut units = BTreeMap::new();
        for entry in fs::read_dir(&dir).map_err(Error::from)? {
            let path = entry.map_err(Error::from)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if is_ignored(name) {
                continue;
            }
            let unit = Self::read_unit(app, name, &path)?;
            units.insert(name.to_string(), unit);
        }
        tracing::debug!(app, count = units.len(), "discovered change files");
        Ok(Discovered::Changes(units))
    }
}

/// In-memory registry of units.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    apps: BTreeMap<String, Option<BTreeMap<String, ChangeUnit>>>,
}

impl StaticDiscovery {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit under its own app.
    pub fn with_unit(mut self, unit: ChangeUnit) -> Self {
        self.add_unit(unit);
        self
    }

    /// Register several units.
    pub fn with_units<I: IntoIterator<Item = ChangeUnit>>(mut self, units: I) -> Self {
        for unit in units {
            self.add_unit(unit);
        }
        self
    }

    /// Register an app without change storage.
    pub fn with_unchanged_app(mut self, app: impl Into<String>) -> Self {
        self.apps.insert(app.into(), None);
        self
    }

    /// Register an app with change storage but no units yet.
    pub fn with_empty_app(mut self, app: impl Into<String>) -> Self {
        self.apps.entry(app.into()).or_insert_with(|| Some(BTreeMap::new()));
        self
    }

    /// Register a unit, replacing one with the same key.
    pub fn add_unit(&mut self, unit: ChangeUnit) {
        self.apps
            .entry(unit.app.clone())
            .or_insert_with(|| Some(BTreeMap::new()))
            .get_or_insert_with(BTreeMap::new)
            .insert(unit.name.clone(), unit);
    }

    /// Drop a unit, as if its file was deleted.
    pub fn remove_unit(&mut self, app: &str, name: &str) -> Option<ChangeUnit> {
        self.apps
            .get_mut(app)
            .and_then(|units| units.as_mut())
            .and_then(|units| units.remove(name))
    }
}

impl Discovery for StaticDiscovery {
    fn apps(&self) -> Result<Vec<String>, ChangeError> {
        Ok(self.apps.keys().cloned().collect())
    }

    fn discover(&self, app: &str) -> Result<Discovered, ChangeError> {
        Ok(match self.apps.get(app) {
            Some(Some(units)) => Discovered::Changes(units.clone()),
            Some(None) | None => Discovered::Unchanged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, contents: &str) {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_directory_discovery() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "auth/changes/0001_initial.json", "{}");
        write(
            tmp.path(),
            "auth/changes/0002_email.json",
            r#"{"dependencies": [["auth", "0001_initial"]]}"#,
        );
        write(tmp.path(), "auth/changes/_draft.json", "not json");
        write(tmp.path(), "auth/changes/.0003.json", "not json");
        write(tmp.path(), "auth/changes/notes.txt", "ignored");
        write(tmp.path(), "legacy/models.txt", "no changes dir");
        fs::create_dir_all(tmp.path().join("empty/changes")).unwrap();

        let discovery = DirectoryDiscovery::new(tmp.path());
        assert_eq!(discovery.apps().unwrap(), vec!["auth", "empty", "legacy"]);

        let Discovered::Changes(units) = discovery.discover("auth").unwrap() else {
            panic!("auth should have changes");
        };
        assert_eq!(units.len(), 2);
        let second = &units["0002_email"];
        assert_eq!(second.app, "auth");
        assert_eq!(second.name, "0002_email");
        assert_eq!(second.dependencies.len(), 1);

        assert!(matches!(discovery.discover("legacy").unwrap(), Discovered::Unchanged));
        assert!(matches!(
            discovery.discover("empty").unwrap(),
            Discovered::Changes(ref units) if units.is_empty()
        ));
    }

    #[test]
    fn test_unreadable_file_is_bad_change() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "auth/changes/0001_initial.json", "{ broken");

        let err = DirectoryDiscovery::new(tmp.path())
            .discover("auth")
            .unwrap_err();
        assert!(matches!(err, ChangeError::BadChange { ref name, .. } if name == "0001_initial"));
    }

    #[test]
    fn test_static_discovery() {
        let mut discovery = StaticDiscovery::new()
            .with_unit(ChangeUnit::new("auth", "0001"))
            .with_unchanged_app("legacy")
            .with_empty_app("blog");

        assert_eq!(discovery.apps().unwrap(), vec!["auth", "blog", "legacy"]);
        assert!(discovery.remove_unit("auth", "0001").is_some());
        assert!(matches!(
            discovery.discover("auth").unwrap(),
            Discovered::Changes(ref units) if units.is_empty()
        ));
        assert!(matches!(discovery.discover("legacy").unwrap(), Discovered::Unchanged));
    }
}
