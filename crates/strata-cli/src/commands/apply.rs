//! `strata apply` - bring the database to a target.

use crate::config::CliConfig;
use crate::error::CliError;
use std::io::Write;
use std::time::Instant;
use strata_core::changes::ChangeLoader;
use strata_core::{
    ChangeExecutor, ChangePlan, DirectoryDiscovery, Direction, JournalBackend, LoaderConfig,
    Phase, Progress, SledRecorder, Target,
};

/// Arguments of `strata apply`.
#[derive(clap::Args, Debug)]
pub struct ApplyArgs {
    /// App to bring to a target; every app when omitted
    pub app: Option<String>,

    /// Change name or unique prefix to end at, or `zero` to unapply the app
    pub name: Option<String>,

    /// Record the changes as applied or unapplied without running them
    #[arg(long)]
    pub fake: bool,

    /// Show the planned operations and exit
    #[arg(long)]
    pub plan: bool,
}

/// Run `strata apply`.
pub fn run(config: &CliConfig, args: ApplyArgs) -> Result<(), CliError> {
    let started = Instant::now();
    let db = sled::open(&config.data_path)?;
    let discovery = DirectoryDiscovery::new(&config.changes_root);
    let recorder = SledRecorder::new(&db);
    let loader = ChangeLoader::load(&discovery, Some(&recorder), LoaderConfig::default())?;

    loader.check_consistent_history(loader.applied())?;
    let conflicts = loader.detect_conflicts();
    if !conflicts.is_empty() {
        return Err(CliError::conflicts(&conflicts));
    }

    let targets = resolve_targets(&loader, &args)?;
    let backend = JournalBackend::open(&db)?;
    let verbosity = config.verbosity;
    let mut executor = ChangeExecutor::new(loader, recorder, backend)
        .with_progress(progress_printer(verbosity));

    let plan = executor.compute_plan(&targets, false)?;
    tracing::debug!(steps = plan.len(), "apply plan computed");

    if args.plan {
        print_plan(executor.loader(), &plan);
        return Ok(());
    }

    if verbosity >= 1 {
        println!("Operations to perform:");
        describe_targets(&args, &targets);
        println!("Running changes:");
        if plan.is_empty() {
            println!("  No changes to apply.");
        }
    }

    executor.run(&targets, Some(plan), None, args.fake)?;
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        fake = args.fake,
        "apply finished"
    );
    Ok(())
}

fn resolve_targets(loader: &ChangeLoader, args: &ApplyArgs) -> Result<Vec<Target>, CliError> {
    let Some(app) = &args.app else {
        return Ok(loader
            .graph()
            .leaf_nodes(None)
            .into_iter()
            .map(Target::from)
            .collect());
    };
    if !loader.changed_apps().contains(app) {
        return Err(if loader.unchanged_apps().contains(app) {
            CliError::NoChanges(app.clone())
        } else {
            CliError::UnknownApp(app.clone())
        });
    }

    match args.name.as_deref() {
        Some("zero") => Ok(vec![Target::zero(app.as_str())]),
        Some(prefix) => {
            let unit = loader.get_by_prefix(app, prefix)?;
            Ok(vec![Target::from(unit.key())])
        }
        None => Ok(loader
            .graph()
            .leaf_nodes(Some(app.as_str()))
            .into_iter()
            .map(Target::from)
            .collect()),
    }
}

fn describe_targets(args: &ApplyArgs, targets: &[Target]) {
    match (&args.app, targets) {
        (Some(app), [Target { name: None, .. }]) => println!("  Unapply all changes: {app}"),
        (Some(app), [Target { name: Some(name), .. }]) if args.name.is_some() => {
            println!("  Target specific change: {name}, from {app}")
        }
        _ => {
            let mut apps: Vec<&str> = targets.iter().map(|t| t.app.as_str()).collect();
            apps.sort_unstable();
            apps.dedup();
            println!("  Apply all changes: {}", apps.join(", "));
        }
    }
}

fn print_plan(loader: &ChangeLoader, plan: &ChangePlan) {
    println!("Planned operations:");
    if plan.is_empty() {
        println!("  No planned changes.");
        return;
    }
    for step in &plan.steps {
        let Some(unit) = loader.graph().node(&step.key) else {
            continue;
        };
        let backwards = step.direction == Direction::Backwards;
        println!("{}{}", step.key, if backwards { " (unapply)" } else { "" });
        for operation in &unit.operations {
            let mut line = operation.describe();
            if backwards && !operation.reversible() {
                line.push_str(" -> IRREVERSIBLE");
            }
            println!("    {line}");
        }
    }
}

/// Observer printing one line per unit, with timings above verbosity 1.
fn progress_printer(verbosity: u8) -> impl FnMut(&Progress<'_>) + 'static {
    let mut started = Instant::now();
    move |progress: &Progress<'_>| {
        if verbosity == 0 {
            return;
        }
        let elapsed = if verbosity > 1 {
            format!(" ({:.3}s)", started.elapsed().as_secs_f64())
        } else {
            String::new()
        };
        let key = progress.change.map(|unit| unit.key().to_string());
        let key = key.as_deref().unwrap_or_default();
        match progress.phase {
            Phase::RenderStart => {
                started = Instant::now();
                print!("  Rendering model states...");
            }
            Phase::RenderSuccess => println!(" DONE{elapsed}"),
            Phase::ApplyStart => {
                started = Instant::now();
                print!("  Applying {key}...");
            }
            Phase::UnapplyStart => {
                started = Instant::now();
                print!("  Unapplying {key}...");
            }
            Phase::ApplySuccess | Phase::UnapplySuccess => {
                let outcome = if progress.fake { "FAKED" } else { "OK" };
                println!(" {outcome}{elapsed}");
            }
        }
        if let Err(e) = std::io::stdout().flush() {
            tracing::warn!(error = %e, "cannot flush progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::changes::ChangeKey;
    use strata_core::{ChangeUnit, ChangeWriter, Operation, Recorder};
    use tempfile::TempDir;

    fn args(app: Option<&str>, name: Option<&str>) -> ApplyArgs {
        ApplyArgs {
            app: app.map(str::to_string),
            name: name.map(str::to_string),
            fake: false,
            plan: false,
        }
    }

    #[test]
    fn test_progress_printer_handles_every_phase() {
        let unit = ChangeUnit::new("blog", "0001_initial");
        let mut printer = progress_printer(2);
        for (phase, change) in [
            (Phase::RenderStart, None),
            (Phase::RenderSuccess, None),
            (Phase::ApplyStart, Some(&unit)),
            (Phase::ApplySuccess, Some(&unit)),
            (Phase::UnapplyStart, Some(&unit)),
            (Phase::UnapplySuccess, Some(&unit)),
        ] {
            printer(&Progress {
                phase,
                change,
                fake: false,
            });
        }
    }

    #[test]
    fn test_apply_then_unapply_app() {
        let tmp = TempDir::new().unwrap();
        let changes = tmp.path().join("changes");
        let initial = ChangeUnit::new("blog", "0001_initial").with_operation(
            Operation::reversible_command("CREATE TABLE post", "DROP TABLE post"),
        );
        let tags = ChangeUnit::new("blog", "0002_tags")
            .depends_on(initial.key())
            .with_operation(Operation::reversible_command(
                "CREATE TABLE tag",
                "DROP TABLE tag",
            ));
        ChangeWriter::new(&initial, &changes).write().unwrap();
        ChangeWriter::new(&tags, &changes).write().unwrap();

        let config = CliConfig::new()
            .with_changes_root(&changes)
            .with_data_path(tmp.path().join("data"))
            .with_verbosity(2);

        run(&config, args(None, None)).unwrap();
        run(&config, args(Some("blog"), Some("0001"))).unwrap();

        let db = sled::open(tmp.path().join("data")).unwrap();
        let applied = SledRecorder::new(&db).applied().unwrap();
        assert_eq!(
            applied.into_iter().collect::<Vec<_>>(),
            vec![ChangeKey::new("blog", "0001_initial")]
        );
        drop(db);

        let err = run(&config, args(Some("shop"), None)).unwrap_err();
        assert!(matches!(err, CliError::UnknownApp(_)));
    }
}
