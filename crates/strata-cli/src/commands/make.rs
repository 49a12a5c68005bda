//! `strata make` - create new change files.

use crate::config::CliConfig;
use crate::error::CliError;
use crate::questioner::InteractiveQuestioner;
use std::collections::{BTreeMap, BTreeSet};
use strata_core::changes::ChangeLoader;
use strata_core::discovery::Discovery;
use strata_core::{
    arrange_for_graph, ChangeUnit, ChangeWriter, DirectoryDiscovery, LoaderConfig,
    MemoryRecorder, MergePlan, NonInteractiveQuestioner, Questioner,
};

/// Arguments of `strata make`.
#[derive(clap::Args, Debug)]
pub struct MakeArgs {
    /// Apps to create a change for
    pub apps: Vec<String>,

    /// Write merge changes for apps with more than one leaf
    #[arg(long)]
    pub merge: bool,

    /// Show what would be written without writing it
    #[arg(long)]
    pub dry_run: bool,

    /// Name of the new change
    #[arg(short = 'n', long)]
    pub name: Option<String>,
}

/// Run `strata make`.
pub fn run(config: &CliConfig, args: MakeArgs) -> Result<(), CliError> {
    let discovery = DirectoryDiscovery::new(&config.changes_root);
    let known: BTreeSet<String> = discovery.apps()?.into_iter().collect();
    if let Some(app) = args.apps.iter().find(|app| !known.contains(*app)) {
        return Err(CliError::UnknownApp(app.clone()));
    }

    let recorder = MemoryRecorder::new();
    let loader = ChangeLoader::load(&discovery, Some(&recorder), LoaderConfig::default())?;

    let mut conflicts = loader.detect_conflicts();
    if !args.apps.is_empty() {
        conflicts.retain(|app, _| args.apps.contains(app));
    }
    if !conflicts.is_empty() && !args.merge {
        return Err(CliError::conflicts(&conflicts));
    }

    let questioner: Box<dyn Questioner> = if config.interactive {
        Box::new(InteractiveQuestioner::new(args.apps.iter().cloned()))
    } else {
        Box::new(
            NonInteractiveQuestioner::new()
                .with_specified_apps(args.apps.iter().cloned())
                .with_merge(true),
        )
    };

    if args.merge {
        if conflicts.is_empty() {
            println!("No conflicts detected to merge.");
            return Ok(());
        }
        return handle_merge(config, &args, &loader, &conflicts, questioner.as_ref());
    }

    if args.apps.is_empty() {
        return Err(CliError::NoApps);
    }

    let proposed: BTreeMap<String, Vec<ChangeUnit>> = args
        .apps
        .iter()
        .map(|app| (app.clone(), vec![ChangeUnit::new(app.as_str(), "custom")]))
        .collect();
    let arranged = arrange_for_graph(
        proposed,
        loader.graph(),
        questioner.as_ref(),
        args.name.as_deref(),
    );
    if arranged.values().all(Vec::is_empty) {
        if config.verbosity >= 1 {
            println!("No changes detected");
        }
        return Ok(());
    }
    write_changes(config, &args, &arranged)
}

fn write_changes(
    config: &CliConfig,
    args: &MakeArgs,
    changes: &BTreeMap<String, Vec<ChangeUnit>>,
) -> Result<(), CliError> {
    for (app, units) in changes {
        if config.verbosity >= 1 {
            println!("Changes for '{app}':");
        }
        for unit in units {
            let writer = ChangeWriter::new(unit, &config.changes_root);
            if args.dry_run {
                if config.verbosity >= 1 {
                    println!("  {}", writer.path().display());
                }
                if config.verbosity >= 3 {
                    print!("{}", writer.as_string()?);
                }
                continue;
            }
            let path = writer.write()?;
            tracing::info!(change = %unit.key(), path = %path.display(), "change written");
            if config.verbosity >= 1 {
                println!("  {}", path.display());
                for operation in &unit.operations {
                    println!("    - {}", operation.describe());
                }
            }
        }
    }
    Ok(())
}

fn handle_merge(
    config: &CliConfig,
    args: &MakeArgs,
    loader: &ChangeLoader,
    conflicts: &BTreeMap<String, BTreeSet<String>>,
    questioner: &dyn Questioner,
) -> Result<(), CliError> {
    for (app, names) in conflicts {
        let plan = MergePlan::for_app(loader, app, names)?;
        if config.verbosity >= 1 {
            println!("Merging {app}");
            for branch in &plan.branches {
                println!("  Branch {}", branch.leaf.name);
                for operation in &branch.operations {
                    println!("    - {operation}");
                }
            }
        }
        if !questioner.ask_merge(app) {
            continue;
        }

        let unit = plan.merge_change(args.name.as_deref());
        let writer = ChangeWriter::new(&unit, &config.changes_root);
        if args.dry_run {
            if config.verbosity >= 1 {
                println!("Created new merge change {}", writer.path().display());
            }
            if config.verbosity >= 3 {
                print!("{}", writer.as_string()?);
            }
            continue;
        }
        let path = writer.write()?;
        tracing::info!(change = %unit.key(), "merge change written");
        if config.verbosity >= 1 {
            println!("Created new merge change {}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use strata_core::changes::ChangeKey;
    use tempfile::TempDir;

    fn config(root: &std::path::Path) -> CliConfig {
        CliConfig::new()
            .with_changes_root(root)
            .with_interactive(false)
            .with_verbosity(0)
    }

    fn args(apps: &[&str], merge: bool) -> MakeArgs {
        MakeArgs {
            apps: apps.iter().map(|s| s.to_string()).collect(),
            merge,
            dry_run: false,
            name: None,
        }
    }

    fn write_unit(root: &std::path::Path, unit: &ChangeUnit) {
        ChangeWriter::new(unit, root).write().unwrap();
    }

    #[test]
    fn test_make_initial_then_next() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("blog")).unwrap();
        let config = config(tmp.path());

        run(&config, args(&["blog"], false)).unwrap();
        assert!(tmp.path().join("blog/changes/0001_initial.json").exists());

        let mut next = args(&["blog"], false);
        next.name = Some("tags".to_string());
        run(&config, next).unwrap();
        let text = fs::read_to_string(tmp.path().join("blog/changes/0002_tags.json")).unwrap();
        assert!(text.contains("0001_initial"));
    }

    #[test]
    fn test_unknown_app() {
        let tmp = TempDir::new().unwrap();
        let err = run(&config(tmp.path()), args(&["nope"], false)).unwrap_err();
        assert!(matches!(err, CliError::UnknownApp(_)));
    }

    #[test]
    fn test_conflicts_need_merge() {
        let tmp = TempDir::new().unwrap();
        let initial = ChangeKey::new("blog", "0001_initial");
        write_unit(tmp.path(), &ChangeUnit::new("blog", "0001_initial"));
        write_unit(
            tmp.path(),
            &ChangeUnit::new("blog", "0002_a").depends_on(initial.clone()),
        );
        write_unit(
            tmp.path(),
            &ChangeUnit::new("blog", "0002_b").depends_on(initial),
        );
        let config = config(tmp.path());

        let err = run(&config, args(&["blog"], false)).unwrap_err();
        assert!(matches!(err, CliError::Conflicts(_)));

        let mut merge = args(&[], true);
        merge.name = Some("merge".to_string());
        run(&config, merge).unwrap();
        assert!(tmp.path().join("blog/changes/0003_merge.json").exists());

        run(&config, args(&[], true)).unwrap();
    }
}
