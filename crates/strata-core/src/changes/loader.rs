//! Loading change-units into a dependency graph.

use super::{ChangeError, ChangeGraph, ChangeKey, ChangeUnit, Recorder, FIRST};
use crate::discovery::{Discovered, Discovery};
use crate::state::SchemaState;
use std::collections::{BTreeMap, BTreeSet};

/// Loader options.
#[derive(Debug, Clone, Default)]
pub struct LoaderConfig {
    /// Resolve `__first__`/`__latest__` on an app with change storage but no
    /// units to "no dependency" instead of failing.
    pub ignore_no_changes: bool,
}

impl LoaderConfig {
    /// Set `ignore_no_changes`.
    pub fn with_ignore_no_changes(mut self, ignore: bool) -> Self {
        self.ignore_no_changes = ignore;
        self
    }
}

/// Discovered units, the graph built from them and the applied set.
///
/// The applied set is read once at construction. Only the executor owning
/// the loader keeps it current; call [`ChangeLoader::rebuild`] to observe
/// any other change.
#[derive(Debug, Clone)]
pub struct ChangeLoader {
    config: LoaderConfig,
    disk_changes: BTreeMap<ChangeKey, ChangeUnit>,
    applied: BTreeSet<ChangeKey>,
    unchanged_apps: BTreeSet<String>,
    changed_apps: BTreeSet<String>,
    graph: ChangeGraph,
}

impl ChangeLoader {
    /// Discover every app, read the applied set and build the graph.
    ///
    /// Without a recorder the applied set is empty.
    pub fn load(
        discovery: &dyn Discovery,
        recorder: Option<&dyn Recorder>,
        config: LoaderConfig,
    ) -> Result<Self, ChangeError> {
        let mut loader = Self {
            config,
            disk_changes: BTreeMap::new(),
            applied: BTreeSet::new(),
            unchanged_apps: BTreeSet::new(),
            changed_apps: BTreeSet::new(),
            graph: ChangeGraph::new(),
        };
        loader.rebuild(discovery, recorder)?;
        Ok(loader)
    }

    /// Re-read discovery and the applied set, replacing everything.
    pub fn rebuild(
        &mut self,
        discovery: &dyn Discovery,
        recorder: Option<&dyn Recorder>,
    ) -> Result<(), ChangeError> {
        self.load_disk(discovery)?;
        self.applied = match recorder {
            Some(recorder) => recorder.applied()?,
            None => BTreeSet::new(),
        };
        self.build_graph()
    }

    fn load_disk(&mut self, discovery: &dyn Discovery) -> Result<(), ChangeError> {
        self.disk_changes.clear();
        self.unchanged_apps.clear();
        self.changed_apps.clear();

        for app in discovery.apps()? {
            match discovery.discover(&app)? {
                Discovered::Unchanged => {
                    self.unchanged_apps.insert(app);
                }
                Discovered::Changes(units) => {
                    for (name, mut unit) in units {
                        unit.app = app.clone();
                        unit.name = name;
                        self.disk_changes.insert(unit.key(), unit);
                    }
                    self.changed_apps.insert(app);
                }
            }
        }
        tracing::debug!(
            changes = self.disk_changes.len(),
            changed_apps = self.changed_apps.len(),
            unchanged_apps = self.unchanged_apps.len(),
            "loaded change units"
        );
        Ok(())
    }

    /// Map a sentinel key to a concrete key.
    ///
    /// Concrete keys and keys already in the graph pass through. `None`
    /// means there is nothing to wait on.
    pub fn resolve_symbolic_key(
        &self,
        key: &ChangeKey,
        current_app: &str,
    ) -> Result<Option<ChangeKey>, ChangeError> {
        if !key.is_symbolic() || self.graph.contains(key) {
            return Ok(Some(key.clone()));
        }
        // The app's own chain is already ordered by its internal edges.
        if key.app == current_app {
            return Ok(None);
        }
        if self.unchanged_apps.contains(&key.app) {
            return Ok(None);
        }
        if self.changed_apps.contains(&key.app) {
            let candidates = if key.name == FIRST {
                self.graph.root_nodes(Some(&key.app))
            } else {
                self.graph.leaf_nodes(Some(&key.app))
            };
            return match candidates.into_iter().next() {
                Some(resolved) => {
                    tracing::debug!(from = %key, to = %resolved, "resolved symbolic dependency");
                    Ok(Some(resolved))
                }
                None if self.config.ignore_no_changes => Ok(None),
                None => Err(ChangeError::EmptyAppDependency {
                    app: key.app.clone(),
                }),
            };
        }
        Err(ChangeError::UnknownApp {
            app: key.app.clone(),
        })
    }

    fn build_graph(&mut self) -> Result<(), ChangeError> {
        self.graph = ChangeGraph::new();
        for unit in self.disk_changes.values() {
            self.graph.add_node(unit.clone())?;
        }

        // Internal edges first, so sentinel resolution sees complete chains.
        for (key, unit) in &self.disk_changes {
            for parent in &unit.dependencies {
                if parent.app == key.app && !parent.is_symbolic() {
                    self.graph.add_dependency(key, key, parent, true)?;
                }
            }
        }

        let mut external = Vec::new();
        for (key, unit) in &self.disk_changes {
            for parent in &unit.dependencies {
                if parent.app == key.app {
                    continue;
                }
                if let Some(parent) = self.resolve_symbolic_key(parent, &key.app)? {
                    external.push((key.clone(), key.clone(), parent));
                }
            }
            for child in &unit.run_before {
                if let Some(child) = self.resolve_symbolic_key(child, &key.app)? {
                    external.push((key.clone(), child, key.clone()));
                }
            }
        }
        for (origin, child, parent) in &external {
            self.graph.add_dependency(origin, child, parent, true)?;
        }

        self.graph.validate_consistency()?;
        self.graph.ensure_not_cyclic()?;
        tracing::debug!(graph = %self.graph, "built change graph");
        Ok(())
    }

    /// Exact lookup.
    pub fn get_change(&self, app: &str, name: &str) -> Result<&ChangeUnit, ChangeError> {
        self.disk_changes
            .get(&ChangeKey::new(app, name))
            .ok_or_else(|| ChangeError::ChangeNotFound {
                app: app.to_string(),
                name: name.to_string(),
            })
    }

    /// Unique-prefix lookup within an app.
    pub fn get_by_prefix(&self, app: &str, prefix: &str) -> Result<&ChangeUnit, ChangeError> {
        let mut matches = self
            .disk_changes
            .values()
            .filter(|unit| unit.app == app && unit.name.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(unit), None) => Ok(unit),
            (Some(_), Some(_)) => Err(ChangeError::Ambiguity {
                app: app.to_string(),
                prefix: prefix.to_string(),
            }),
            (None, _) => Err(ChangeError::ChangeNotFound {
                app: app.to_string(),
                name: prefix.to_string(),
            }),
        }
    }

    /// Fail if an applied unit in the graph has an unapplied parent.
    pub fn check_consistent_history(&self, applied: &BTreeSet<ChangeKey>) -> Result<(), ChangeError> {
        for key in applied {
            if !self.graph.contains(key) {
                continue;
            }
            if let Some(parent) = self
                .graph
                .parents(key)
                .into_iter()
                .find(|parent| !applied.contains(*parent))
            {
                return Err(ChangeError::InconsistentHistory {
                    change: key.clone(),
                    dependency: parent.clone(),
                });
            }
        }
        Ok(())
    }

    /// Apps with more than one leaf, with their leaf names.
    pub fn detect_conflicts(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut leaves: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for key in self.graph.leaf_nodes(None) {
            leaves.entry(key.app).or_default().insert(key.name);
        }
        leaves.retain(|_, names| names.len() > 1);
        leaves
    }

    /// Schema state at `nodes` (every leaf when `None`), starting from the
    /// unchanged apps.
    pub fn project_state(
        &self,
        nodes: Option<&[ChangeKey]>,
        at_end: bool,
    ) -> Result<SchemaState, ChangeError> {
        match nodes {
            Some(nodes) => self.graph.make_state(nodes, at_end, &self.unchanged_apps),
            None => {
                let leaves = self.graph.leaf_nodes(None);
                self.graph.make_state(&leaves, at_end, &self.unchanged_apps)
            }
        }
    }

    /// The dependency graph.
    pub fn graph(&self) -> &ChangeGraph {
        &self.graph
    }

    /// The applied set read at construction, plus the executor's own writes.
    pub fn applied(&self) -> &BTreeSet<ChangeKey> {
        &self.applied
    }

    pub(crate) fn mark_applied(&mut self, key: ChangeKey) {
        self.applied.insert(key);
    }

    pub(crate) fn mark_unapplied(&mut self, key: &ChangeKey) {
        self.applied.remove(key);
    }

    /// Apps with change storage.
    pub fn changed_apps(&self) -> &BTreeSet<String> {
        &self.changed_apps
    }

    /// Apps without change storage.
    pub fn unchanged_apps(&self) -> &BTreeSet<String> {
        &self.unchanged_apps
    }

    /// Every discovered unit.
    pub fn disk_changes(&self) -> &BTreeMap<ChangeKey, ChangeUnit> {
        &self.disk_changes
    }

    /// The loader options.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::MemoryRecorder;
    use crate::discovery::StaticDiscovery;

    fn key(app: &str, name: &str) -> ChangeKey {
        ChangeKey::new(app, name)
    }

    fn blog_and_auth() -> StaticDiscovery {
        StaticDiscovery::new().with_units([
            ChangeUnit::new("auth", "0001_initial"),
            ChangeUnit::new("auth", "0002_email").depends_on(key("auth", "0001_initial")),
            ChangeUnit::new("blog", "0001_initial")
                .depends_on(ChangeKey::first("blog"))
                .depends_on(ChangeKey::latest("auth")),
        ])
    }

    #[test]
    fn test_symbolic_keys_resolved() {
        let loader = ChangeLoader::load(&blog_and_auth(), None, LoaderConfig::default()).unwrap();
        let graph = loader.graph();

        assert_eq!(graph.len(), 3);
        assert_eq!(
            graph.parents(&key("blog", "0001_initial")),
            vec![&key("auth", "0002_email")]
        );
        assert_eq!(
            loader
                .resolve_symbolic_key(&ChangeKey::first("auth"), "blog")
                .unwrap(),
            Some(key("auth", "0001_initial"))
        );
        assert_eq!(
            loader
                .resolve_symbolic_key(&ChangeKey::latest("blog"), "blog")
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_unknown_and_unchanged_apps() {
        let discovery = StaticDiscovery::new()
            .with_unchanged_app("legacy")
            .with_unit(ChangeUnit::new("blog", "0001").depends_on(ChangeKey::first("legacy")));
        let loader = ChangeLoader::load(&discovery, None, LoaderConfig::default()).unwrap();
        assert!(loader.graph().parents(&key("blog", "0001")).is_empty());
        assert!(loader.unchanged_apps().contains("legacy"));

        let discovery = StaticDiscovery::new()
            .with_unit(ChangeUnit::new("blog", "0001").depends_on(ChangeKey::first("ghost")));
        let err = ChangeLoader::load(&discovery, None, LoaderConfig::default()).unwrap_err();
        assert!(matches!(err, ChangeError::UnknownApp { ref app } if app == "ghost"));
    }

    #[test]
    fn test_empty_app_dependency() {
        let discovery = StaticDiscovery::new()
            .with_empty_app("auth")
            .with_unit(ChangeUnit::new("blog", "0001").depends_on(ChangeKey::latest("auth")));

        let err = ChangeLoader::load(&discovery, None, LoaderConfig::default()).unwrap_err();
        assert!(matches!(err, ChangeError::EmptyAppDependency { .. }));

        let config = LoaderConfig::default().with_ignore_no_changes(true);
        let loader = ChangeLoader::load(&discovery, None, config).unwrap();
        assert!(loader.changed_apps().contains("auth"));
    }

    #[test]
    fn test_run_before_edges() {
        let discovery = StaticDiscovery::new().with_units([
            ChangeUnit::new("auth", "0001"),
            ChangeUnit::new("blog", "0001").runs_before(key("auth", "0001")),
        ]);
        let loader = ChangeLoader::load(&discovery, None, LoaderConfig::default()).unwrap();

        assert_eq!(
            loader.graph().forwards_plan(&key("auth", "0001")).unwrap(),
            vec![key("blog", "0001"), key("auth", "0001")]
        );
    }

    #[test]
    fn test_missing_dependency_names_origin() {
        let discovery = StaticDiscovery::new()
            .with_unit(ChangeUnit::new("auth", "0002").depends_on(key("auth", "0001")));

        let err = ChangeLoader::load(&discovery, None, LoaderConfig::default()).unwrap_err();
        match err {
            ChangeError::NodeNotFound { node, origin } => {
                assert_eq!(node, key("auth", "0001"));
                assert_eq!(origin, Some(key("auth", "0002")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_prefix_lookup() {
        let loader = ChangeLoader::load(&blog_and_auth(), None, LoaderConfig::default()).unwrap();

        assert_eq!(loader.get_by_prefix("auth", "0002").unwrap().name, "0002_email");
        assert!(matches!(
            loader.get_by_prefix("auth", "000"),
            Err(ChangeError::Ambiguity { .. })
        ));
        assert!(matches!(
            loader.get_by_prefix("auth", "0009"),
            Err(ChangeError::ChangeNotFound { .. })
        ));
        assert!(loader.get_change("auth", "0001_initial").is_ok());
        assert!(loader.get_change("auth", "0001").is_err());
    }

    #[test]
    fn test_history_and_conflicts() {
        let recorder = MemoryRecorder::with_applied([key("auth", "0002_email")]);
        let loader =
            ChangeLoader::load(&blog_and_auth(), Some(&recorder), LoaderConfig::default()).unwrap();

        let err = loader.check_consistent_history(loader.applied()).unwrap_err();
        assert!(matches!(
            err,
            ChangeError::InconsistentHistory { ref dependency, .. } if *dependency == key("auth", "0001_initial")
        ));
        assert!(loader.detect_conflicts().is_empty());

        let discovery = blog_and_auth().with_unit(
            ChangeUnit::new("auth", "0002_username").depends_on(key("auth", "0001_initial")),
        );
        let loader = ChangeLoader::load(&discovery, None, LoaderConfig::default()).unwrap();
        let conflicts = loader.detect_conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts["auth"].len(), 2);
    }
}
