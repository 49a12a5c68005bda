//! Directed dependency graph over change-units.
//!
//! Nodes are units keyed by [`ChangeKey`]; an edge runs from a child to each
//! parent it depends on. Parents of a node must run before it. The graph
//! holds units from every app; edges may cross apps.

use super::{ChangeError, ChangeKey, ChangeUnit};
use crate::state::SchemaState;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Default)]
struct Node {
    parents: BTreeSet<ChangeKey>,
    children: BTreeSet<ChangeKey>,
}

/// Dependency graph of change-units.
#[derive(Debug, Clone, Default)]
pub struct ChangeGraph {
    nodes: BTreeMap<ChangeKey, ChangeUnit>,
    node_map: BTreeMap<ChangeKey, Node>,
    /// Placeholders for referenced but absent keys, with the referencing unit.
    dummies: BTreeMap<ChangeKey, ChangeKey>,
}

impl ChangeGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a unit.
    ///
    /// Fails with `DuplicateNode` if the key is already a real node. A key
    /// that so far only existed as a placeholder is promoted, keeping its
    /// edges.
    pub fn add_node(&mut self, unit: ChangeUnit) -> Result<(), ChangeError> {
        let key = unit.key();
        if self.nodes.contains_key(&key) {
            return Err(ChangeError::DuplicateNode { node: key });
        }
        self.dummies.remove(&key);
        self.node_map.entry(key.clone()).or_default();
        self.nodes.insert(key, unit);
        Ok(())
    }

    /// Record that `child` depends on `parent`.
    ///
    /// Without `skip_validation` both keys must already be nodes. With it,
    /// absent keys become placeholders attributed to `origin`, to be caught
    /// by [`ChangeGraph::validate_consistency`].
    pub fn add_dependency(
        &mut self,
        origin: &ChangeKey,
        child: &ChangeKey,
        parent: &ChangeKey,
        skip_validation: bool,
    ) -> Result<(), ChangeError> {
        for key in [child, parent] {
            if self.nodes.contains_key(key) {
                continue;
            }
            if !skip_validation {
                return Err(ChangeError::NodeNotFound {
                    node: key.clone(),
                    origin: Some(origin.clone()),
                });
            }
            self.dummies
                .entry(key.clone())
                .or_insert_with(|| origin.clone());
            self.node_map.entry(key.clone()).or_default();
        }

        self.node_map
            .entry(child.clone())
            .or_default()
            .parents
            .insert(parent.clone());
        self.node_map
            .entry(parent.clone())
            .or_default()
            .children
            .insert(child.clone());
        Ok(())
    }

    /// Fail with `NodeNotFound` if any edge points at a placeholder.
    pub fn validate_consistency(&self) -> Result<(), ChangeError> {
        match self.dummies.iter().next() {
            Some((node, origin)) => Err(ChangeError::NodeNotFound {
                node: node.clone(),
                origin: Some(origin.clone()),
            }),
            None => Ok(()),
        }
    }

    /// Nodes with no parent in their own app, sorted.
    ///
    /// Dependencies on other apps do not stop a node from being the start of
    /// its app's chain.
    pub fn root_nodes(&self, app: Option<&str>) -> Vec<ChangeKey> {
        self.nodes
            .keys()
            .filter(|key| app.map_or(true, |app| key.app == app))
            .filter(|key| {
                self.node_map
                    .get(*key)
                    .map_or(true, |node| node.parents.iter().all(|p| p.app != key.app))
            })
            .cloned()
            .collect()
    }

    /// Nodes with no child in their own app, sorted.
    pub fn leaf_nodes(&self, app: Option<&str>) -> Vec<ChangeKey> {
        self.nodes
            .keys()
            .filter(|key| app.map_or(true, |app| key.app == app))
            .filter(|key| {
                self.node_map
                    .get(*key)
                    .map_or(true, |node| node.children.iter().all(|c| c.app != key.app))
            })
            .cloned()
            .collect()
    }

    /// Units to apply to reach `target`, parents first, `target` last.
    pub fn forwards_plan(&self, target: &ChangeKey) -> Result<Vec<ChangeKey>, ChangeError> {
        self.depth_first(target, |node| &node.parents, &mut BTreeSet::new())
    }

    /// Units to unapply to remove `target`, descendants first, `target` last.
    pub fn backwards_plan(&self, target: &ChangeKey) -> Result<Vec<ChangeKey>, ChangeError> {
        self.depth_first(target, |node| &node.children, &mut BTreeSet::new())
    }

    /// Fail with `CircularDependency` if the graph has any cycle.
    pub fn ensure_not_cyclic(&self) -> Result<(), ChangeError> {
        let mut visited = BTreeSet::new();
        for key in self.nodes.keys() {
            if !visited.contains(key) {
                self.depth_first(key, |node| &node.parents, &mut visited)?;
            }
        }
        Ok(())
    }

    /// Post-order walk from `start`, visiting neighbours in ascending key
    /// order and failing on the first cycle found. Nodes already in
    /// `visited` are neither walked nor returned.
    fn depth_first<F>(
        &self,
        start: &ChangeKey,
        neighbours: F,
        visited: &mut BTreeSet<ChangeKey>,
    ) -> Result<Vec<ChangeKey>, ChangeError>
    where
        F: Fn(&Node) -> &BTreeSet<ChangeKey>,
    {
        if !self.nodes.contains_key(start) {
            return Err(ChangeError::NodeNotFound {
                node: start.clone(),
                origin: None,
            });
        }

        let pending = |key: &ChangeKey| -> Vec<ChangeKey> {
            self.node_map
                .get(key)
                .map(|node| neighbours(node).iter().rev().cloned().collect())
                .unwrap_or_default()
        };

        let mut plan = Vec::new();
        let mut on_path = BTreeSet::from([start.clone()]);
        let mut stack = vec![(start.clone(), pending(start))];

        while let Some((key, remaining)) = stack.last_mut() {
            match remaining.pop() {
                Some(next) => {
                    if visited.contains(&next) {
                        continue;
                    }
                    if on_path.contains(&next) {
                        let mut cycle: Vec<ChangeKey> = stack
                            .iter()
                            .map(|(k, _)| k.clone())
                            .skip_while(|k| *k != next)
                            .collect();
                        cycle.push(next);
                        return Err(ChangeError::CircularDependency { cycle });
                    }
                    on_path.insert(next.clone());
                    let frame = pending(&next);
                    stack.push((next, frame));
                }
                None => {
                    let done = key.clone();
                    stack.pop();
                    on_path.remove(&done);
                    visited.insert(done.clone());
                    plan.push(done);
                }
            }
        }
        Ok(plan)
    }

    /// Build the schema state at `nodes`.
    ///
    /// Starts from `real_apps` and replays the forward plan of every node.
    /// With `at_end` false the requested nodes themselves are left out,
    /// giving the state right before they ran.
    pub fn make_state(
        &self,
        nodes: &[ChangeKey],
        at_end: bool,
        real_apps: &BTreeSet<String>,
    ) -> Result<SchemaState, ChangeError> {
        let requested: BTreeSet<&ChangeKey> = nodes.iter().collect();
        let mut plan: Vec<ChangeKey> = Vec::new();
        let mut seen = BTreeSet::new();
        for node in nodes {
            for key in self.forwards_plan(node)? {
                if seen.contains(&key) || (!at_end && requested.contains(&key)) {
                    continue;
                }
                seen.insert(key.clone());
                plan.push(key);
            }
        }

        let mut state = SchemaState::with_real_apps(real_apps.iter().cloned());
        for key in &plan {
            if let Some(unit) = self.nodes.get(key) {
                unit.mutate_state(&mut state)?;
            }
        }
        Ok(state)
    }

    /// Whether the key is a real node.
    pub fn contains(&self, key: &ChangeKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// The unit stored under a key.
    pub fn node(&self, key: &ChangeKey) -> Option<&ChangeUnit> {
        self.nodes.get(key)
    }

    /// All units, ordered by key.
    pub fn nodes(&self) -> impl Iterator<Item = &ChangeUnit> {
        self.nodes.values()
    }

    /// Direct parents of a node.
    pub fn parents(&self, key: &ChangeKey) -> Vec<&ChangeKey> {
        self.node_map
            .get(key)
            .map(|node| node.parents.iter().collect())
            .unwrap_or_default()
    }

    /// Direct children of a node.
    pub fn children(&self, key: &ChangeKey) -> Vec<&ChangeKey> {
        self.node_map
            .get(key)
            .map(|node| node.children.iter().collect())
            .unwrap_or_default()
    }

    /// Number of real nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of dependency edges.
    pub fn edge_count(&self) -> usize {
        self.node_map.values().map(|node| node.parents.len()).sum()
    }
}

impl fmt::Display for ChangeGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Graph: {} nodes, {} edges",
            self.nodes.len(),
            self.edge_count()
        )
    }
}
