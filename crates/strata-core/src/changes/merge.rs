//! Merging divergent leaves of one app.

use super::autodetector::parse_number;
use super::{ChangeError, ChangeKey, ChangeLoader, ChangeUnit};

/// One conflicting leaf and the units only it has.
#[derive(Debug, Clone)]
pub struct MergeBranch {
    /// The leaf.
    pub leaf: ChangeKey,
    /// Same-app units from the first to the leaf.
    pub ancestry: Vec<ChangeKey>,
    /// Units past the common ancestors.
    pub branch: Vec<ChangeKey>,
    /// Descriptions of the branch's operations, in order.
    pub operations: Vec<String>,
}

/// The layout of a conflict in one app.
#[derive(Debug, Clone)]
pub struct MergePlan {
    /// The app.
    pub app: String,
    /// Number of leading units every branch shares.
    pub common_ancestor_count: usize,
    /// One branch per conflicting leaf.
    pub branches: Vec<MergeBranch>,
}

impl MergePlan {
    /// Work out the branches of the conflicting leaves `names`.
    pub fn for_app<I, S>(loader: &ChangeLoader, app: &str, names: I) -> Result<Self, ChangeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let graph = loader.graph();
        let mut branches = Vec::new();
        for name in names {
            let unit = loader.get_change(app, name.as_ref())?;
            let ancestry: Vec<ChangeKey> = graph
                .forwards_plan(&unit.key())?
                .into_iter()
                .filter(|key| key.app == app)
                .collect();
            branches.push(MergeBranch {
                leaf: unit.key(),
                ancestry,
                branch: Vec::new(),
                operations: Vec::new(),
            });
        }

        let shortest = branches.iter().map(|b| b.ancestry.len()).min().unwrap_or(0);
        let common_ancestor_count = (0..shortest)
            .take_while(|&i| {
                let first = &branches[0].ancestry[i];
                branches.iter().all(|b| b.ancestry[i] == *first)
            })
            .count();
        if common_ancestor_count == 0 {
            return Err(ChangeError::NoCommonAncestor {
                app: app.to_string(),
                names: branches.iter().map(|b| b.leaf.name.clone()).collect(),
            });
        }

        for branch in &mut branches {
            branch.branch = branch.ancestry[common_ancestor_count..].to_vec();
            for key in &branch.branch {
                let unit = loader.get_change(&key.app, &key.name)?;
                branch
                    .operations
                    .extend(unit.operations.iter().map(|op| op.describe()));
            }
        }

        Ok(Self {
            app: app.to_string(),
            common_ancestor_count,
            branches,
        })
    }

    /// An empty unit depending on every leaf, numbered one past the
    /// biggest leaf number and named `merge_<timestamp>` unless `name` is
    /// given.
    pub fn merge_change(&self, name: Option<&str>) -> ChangeUnit {
        let biggest = self
            .branches
            .iter()
            .filter_map(|b| parse_number(&b.leaf.name))
            .max()
            .unwrap_or(1);
        let label = match name {
            Some(name) => name.to_string(),
            None => chrono::Local::now().format("merge_%Y%m%d_%H%M").to_string(),
        };
        let mut unit = ChangeUnit::new(self.app.as_str(), format!("{:04}_{label}", biggest + 1));
        unit.dependencies = self.branches.iter().map(|b| b.leaf.clone()).collect();
        unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::{LoaderConfig, Operation};
    use crate::discovery::StaticDiscovery;

    fn key(app: &str, name: &str) -> ChangeKey {
        ChangeKey::new(app, name)
    }

    fn forked() -> ChangeLoader {
        let discovery = StaticDiscovery::new().with_units([
            ChangeUnit::new("blog", "0001_initial"),
            ChangeUnit::new("blog", "0002_tags")
                .depends_on(key("blog", "0001_initial"))
                .with_operation(Operation::run_command("CREATE TABLE tag")),
            ChangeUnit::new("blog", "0002_slug").depends_on(key("blog", "0001_initial")),
            ChangeUnit::new("blog", "0003_slug_index")
                .depends_on(key("blog", "0002_slug"))
                .with_operation(Operation::run_procedure("index_slugs")),
        ]);
        ChangeLoader::load(&discovery, None, LoaderConfig::default()).unwrap()
    }

    #[test]
    fn test_merge_plan_branches() {
        let loader = forked();
        let conflicts = loader.detect_conflicts();
        let plan = MergePlan::for_app(&loader, "blog", &conflicts["blog"]).unwrap();

        assert_eq!(plan.common_ancestor_count, 1);
        assert_eq!(plan.branches.len(), 2);
        let tags = plan
            .branches
            .iter()
            .find(|b| b.leaf.name == "0002_tags")
            .unwrap();
        assert_eq!(tags.branch, vec![key("blog", "0002_tags")]);
        assert_eq!(tags.operations, vec!["Raw backend command"]);
        let slug = plan
            .branches
            .iter()
            .find(|b| b.leaf.name == "0003_slug_index")
            .unwrap();
        assert_eq!(slug.branch.len(), 2);

        let merge = plan.merge_change(Some("merge"));
        assert_eq!(merge.name, "0004_merge");
        assert_eq!(merge.dependencies.len(), 2);
        assert!(merge.operations.is_empty());
    }

    #[test]
    fn test_no_common_ancestor() {
        let discovery = StaticDiscovery::new().with_units([
            ChangeUnit::new("blog", "0001_a"),
            ChangeUnit::new("blog", "0001_b"),
        ]);
        let loader = ChangeLoader::load(&discovery, None, LoaderConfig::default()).unwrap();

        let err = MergePlan::for_app(&loader, "blog", ["0001_a", "0001_b"]).unwrap_err();
        assert!(matches!(err, ChangeError::NoCommonAncestor { .. }));
    }
}
