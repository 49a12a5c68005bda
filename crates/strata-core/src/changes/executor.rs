//! Change executor - plans and runs change-units against a backend.
//!
//! A run is either purely forwards or purely backwards. Forward runs walk
//! the canonical plan once. Backward runs need two passes: the state right
//! before a unit historically ran depends on units on both sides of it in
//! the canonical order, so every pre-state is captured first and the units
//! are unapplied afterwards.

use super::plan::{ChangePlan, PlanStep, Target};
use super::progress::{Phase, Progress, ProgressCallback};
use super::{ChangeError, ChangeKey, ChangeLoader, ChangeUnit, ProcedureRegistry, Recorder};
use crate::backend::{Backend, SchemaEditor};
use crate::discovery::Discovery;
use crate::state::SchemaState;
use std::collections::{BTreeMap, BTreeSet};

/// Plans and runs change-units.
pub struct ChangeExecutor<B: Backend, R: Recorder> {
    loader: ChangeLoader,
    recorder: R,
    backend: B,
    procedures: ProcedureRegistry,
    progress: Option<ProgressCallback>,
}

fn notify(
    progress: &mut Option<ProgressCallback>,
    phase: Phase,
    change: Option<&ChangeUnit>,
    fake: bool,
) {
    if let Some(callback) = progress.as_mut() {
        callback(&Progress {
            phase,
            change,
            fake,
        });
    }
}

impl<B: Backend, R: Recorder> ChangeExecutor<B, R> {
    /// Create an executor.
    pub fn new(loader: ChangeLoader, recorder: R, backend: B) -> Self {
        Self {
            loader,
            recorder,
            backend,
            procedures: ProcedureRegistry::new(),
            progress: None,
        }
    }

    /// Use a procedure registry for procedural operations.
    pub fn with_procedures(mut self, procedures: ProcedureRegistry) -> Self {
        self.procedures = procedures;
        self
    }

    /// Install a progress observer.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&Progress<'_>) + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// The loader.
    pub fn loader(&self) -> &ChangeLoader {
        &self.loader
    }

    /// The recorder.
    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Take the executor apart.
    pub fn into_parts(self) -> (ChangeLoader, R, B) {
        (self.loader, self.recorder, self.backend)
    }

    /// Rebuild the loader from discovery and the recorder.
    pub fn reload(&mut self, discovery: &dyn Discovery) -> Result<(), ChangeError> {
        self.loader.rebuild(discovery, Some(&self.recorder))
    }

    /// One target per leaf of the graph.
    pub fn leaf_targets(&self) -> Vec<Target> {
        self.loader
            .graph()
            .leaf_nodes(None)
            .into_iter()
            .map(Target::from)
            .collect()
    }

    /// Check the applied history and refuse to go on while any app has
    /// more than one leaf.
    pub fn preflight(&self) -> Result<(), ChangeError> {
        self.loader.check_consistent_history(self.loader.applied())?;
        let conflicts = self.loader.detect_conflicts();
        if !conflicts.is_empty() {
            return Err(ChangeError::Conflicts { conflicts });
        }
        Ok(())
    }

    /// Compute the plan that brings every target about.
    ///
    /// With `clean_start` the applied set is taken as empty.
    pub fn compute_plan(&self, targets: &[Target], clean_start: bool) -> Result<ChangePlan, ChangeError> {
        let graph = self.loader.graph();
        let mut applied: BTreeSet<ChangeKey> = if clean_start {
            BTreeSet::new()
        } else {
            self.loader.applied().clone()
        };
        let mut plan = ChangePlan::new();

        for target in targets {
            match target.key() {
                None => {
                    for root in graph.root_nodes(Some(&target.app)) {
                        self.unapply_from(&root, &mut applied, &mut plan)?;
                    }
                }
                Some(key) if applied.contains(&key) => {
                    // Roll back to just after the target: only its children in
                    // the same app are undone.
                    let next_in_app: Vec<ChangeKey> = graph
                        .children(&key)
                        .into_iter()
                        .filter(|child| child.app == key.app)
                        .cloned()
                        .collect();
                    for child in &next_in_app {
                        self.unapply_from(child, &mut applied, &mut plan)?;
                    }
                }
                Some(key) => {
                    for step in graph.forwards_plan(&key)? {
                        if applied.insert(step.clone()) {
                            plan.push(PlanStep::forwards(step));
                        }
                    }
                }
            }
        }

        tracing::info!(
            targets = targets.len(),
            steps = plan.len(),
            clean_start,
            "computed change plan"
        );
        Ok(plan)
    }

    /// Add backward steps for `start` and its descendants that are applied.
    fn unapply_from(
        &self,
        start: &ChangeKey,
        applied: &mut BTreeSet<ChangeKey>,
        plan: &mut ChangePlan,
    ) -> Result<(), ChangeError> {
        for key in self.loader.graph().backwards_plan(start)? {
            if applied.remove(&key) {
                plan.push(PlanStep::backwards(key));
            }
        }
        Ok(())
    }

    /// The canonical plan: every unit, in dependency order.
    pub fn full_plan(&self) -> Result<ChangePlan, ChangeError> {
        self.compute_plan(&self.leaf_targets(), true)
    }

    /// A state starting from the unchanged apps, with every applied unit
    /// replayed when `with_applied` is set.
    pub fn create_project_state(&self, with_applied: bool) -> Result<SchemaState, ChangeError> {
        let mut state = SchemaState::with_real_apps(self.loader.unchanged_apps().iter().cloned());
        if with_applied {
            let applied = self.loader.applied();
            for step in self.full_plan()?.steps {
                if !applied.contains(&step.key) {
                    continue;
                }
                if let Some(unit) = self.loader.graph().node(&step.key) {
                    unit.mutate_state(&mut state)?;
                }
            }
        }
        Ok(state)
    }

    /// Run a plan towards `targets`, returning the resulting state.
    ///
    /// The plan is computed when not given. `state` seeds a forward run;
    /// it is built from the applied units when absent. With `fake` the
    /// applied set changes but the backend is never called.
    pub fn run(
        &mut self,
        targets: &[Target],
        plan: Option<ChangePlan>,
        state: Option<SchemaState>,
        fake: bool,
    ) -> Result<SchemaState, ChangeError> {
        self.preflight()?;
        self.recorder.ensure_schema()?;

        let plan = match plan {
            Some(plan) => plan,
            None => self.compute_plan(targets, false)?,
        };
        let full_plan = self.full_plan()?;

        if plan.is_empty() {
            return match state {
                Some(state) => Ok(state),
                None => self.create_project_state(true),
            };
        }
        if plan.is_mixed() {
            return Err(ChangeError::MixedPlan);
        }

        if plan.is_all_forwards() {
            let state = match state {
                Some(state) => state,
                None => self.create_project_state(true)?,
            };
            self.run_forwards(state, &plan, &full_plan, fake)
        } else {
            self.run_backwards(&plan, &full_plan, fake)
        }
    }

    fn run_forwards(
        &mut self,
        mut state: SchemaState,
        plan: &ChangePlan,
        full_plan: &ChangePlan,
        fake: bool,
    ) -> Result<SchemaState, ChangeError> {
        let mut to_run: BTreeSet<&ChangeKey> = plan.keys().collect();
        for key in full_plan.keys() {
            if to_run.is_empty() {
                break;
            }
            if !to_run.remove(key) {
                continue;
            }
            if !state.is_rendered() {
                notify(&mut self.progress, Phase::RenderStart, None, false);
                state.render()?;
                notify(&mut self.progress, Phase::RenderSuccess, None, false);
            }
            self.apply_change(&mut state, key, fake)?;
        }
        Ok(state)
    }

    fn run_backwards(
        &mut self,
        plan: &ChangePlan,
        full_plan: &ChangePlan,
        fake: bool,
    ) -> Result<SchemaState, ChangeError> {
        let graph = self.loader.graph();
        let mut to_run: BTreeSet<&ChangeKey> = plan.keys().collect();
        let mut applied: BTreeSet<ChangeKey> = self
            .loader
            .applied()
            .iter()
            .filter(|key| graph.contains(key))
            .cloned()
            .collect();

        if !fake {
            for key in plan.keys() {
                self.unit(key)?.check_reversible()?;
            }
        }

        // Pass one: the state each unit to undo originally ran against.
        let mut states: BTreeMap<ChangeKey, SchemaState> = BTreeMap::new();
        let mut state = self.create_project_state(false)?;
        notify(&mut self.progress, Phase::RenderStart, None, false);
        for key in full_plan.keys() {
            if to_run.is_empty() {
                break;
            }
            let unit = self.unit(key)?;
            if to_run.remove(key) {
                if !state.is_rendered() {
                    state.render()?;
                }
                states.insert(key.clone(), state.clone());
                unit.mutate_state(&mut state)?;
            } else if applied.contains(key) {
                unit.mutate_state(&mut state)?;
            }
        }
        notify(&mut self.progress, Phase::RenderSuccess, None, false);

        // Pass two: undo, deepest descendants first.
        for key in plan.keys() {
            let before = states.get(key).ok_or_else(|| ChangeError::NodeNotFound {
                node: key.clone(),
                origin: None,
            })?;
            self.unapply_change(before, key, fake)?;
            applied.remove(key);
        }

        let Some(last) = plan.steps.last().map(|step| &step.key) else {
            return self.create_project_state(true);
        };
        let mut state = states.remove(last).unwrap_or_default();
        if let Some(index) = full_plan.position(last) {
            for step in &full_plan.steps[index..] {
                if applied.contains(&step.key) {
                    self.unit(&step.key)?.mutate_state(&mut state)?;
                }
            }
        }
        Ok(state)
    }

    fn unit(&self, key: &ChangeKey) -> Result<&ChangeUnit, ChangeError> {
        self.loader
            .graph()
            .node(key)
            .ok_or_else(|| ChangeError::NodeNotFound {
                node: key.clone(),
                origin: None,
            })
    }

    /// Apply one unit to `state` and record it.
    ///
    /// A fake apply still moves `state` forwards but never calls the backend.
    pub fn apply_change(
        &mut self,
        state: &mut SchemaState,
        key: &ChangeKey,
        fake: bool,
    ) -> Result<(), ChangeError> {
        let unit = self
            .loader
            .graph()
            .node(key)
            .ok_or_else(|| ChangeError::NodeNotFound {
                node: key.clone(),
                origin: None,
            })?;

        notify(&mut self.progress, Phase::ApplyStart, Some(unit), fake);
        if fake {
            unit.mutate_state(state)?;
        } else {
            let mut editor = SchemaEditor::open(&mut self.backend, unit.atomic)?;
            unit.apply(state, &mut editor, &self.procedures)?;
            editor.finish()?;
        }
        self.recorder.record_applied(&unit.app, &unit.name)?;
        tracing::info!(change = %key, fake, "applied change");
        notify(&mut self.progress, Phase::ApplySuccess, Some(unit), fake);

        self.loader.mark_applied(key.clone());
        Ok(())
    }

    /// Unapply one unit from `state`, the schema as it stood right before
    /// the unit ran, and remove its record.
    pub fn unapply_change(
        &mut self,
        state: &SchemaState,
        key: &ChangeKey,
        fake: bool,
    ) -> Result<SchemaState, ChangeError> {
        let unit = self
            .loader
            .graph()
            .node(key)
            .ok_or_else(|| ChangeError::NodeNotFound {
                node: key.clone(),
                origin: None,
            })?;

        notify(&mut self.progress, Phase::UnapplyStart, Some(unit), fake);
        let state = if fake {
            state.clone()
        } else {
            let mut editor = SchemaEditor::open(&mut self.backend, unit.atomic)?;
            let state = unit.unapply(state, &mut editor, &self.procedures)?;
            editor.finish()?;
            state
        };
        self.recorder.record_unapplied(&unit.app, &unit.name)?;
        tracing::info!(change = %key, fake, "unapplied change");
        notify(&mut self.progress, Phase::UnapplySuccess, Some(unit), fake);

        self.loader.mark_unapplied(key);
        Ok(state)
    }
}

impl<B: Backend, R: Recorder> std::fmt::Debug for ChangeExecutor<B, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeExecutor")
            .field("loader", &self.loader)
            .field("procedures", &self.procedures)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::changes::{LoaderConfig, MemoryRecorder, Operation};
    use crate::discovery::StaticDiscovery;
    use crate::state::{FieldState, StateOperation};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    #[derive(Default)]
    struct Log {
        statements: Vec<String>,
        commits: usize,
    }

    impl Backend for Log {
        fn begin(&mut self, _atomic: bool) -> Result<(), BackendError> {
            Ok(())
        }

        fn execute(&mut self, statement: &str, _params: &[serde_json::Value]) -> Result<(), BackendError> {
            self.statements.push(statement.to_string());
            Ok(())
        }

        fn commit(&mut self) -> Result<(), BackendError> {
            self.commits += 1;
            Ok(())
        }

        fn rollback(&mut self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn key(app: &str, name: &str) -> ChangeKey {
        ChangeKey::new(app, name)
    }

    fn create(model: &str) -> Operation {
        Operation::reversible_command(
            format!("CREATE TABLE {model}"),
            format!("DROP TABLE {model}"),
        )
        .with_state_operations(vec![StateOperation::CreateModel {
            name: model.to_string(),
            fields: vec![FieldState::new("id", "int")],
        }])
    }

    fn chain() -> StaticDiscovery {
        StaticDiscovery::new().with_units([
            ChangeUnit::new("x", "0001_a").with_operation(create("A")),
            ChangeUnit::new("x", "0002_b")
                .depends_on(key("x", "0001_a"))
                .with_operation(create("B")),
            ChangeUnit::new("x", "0003_c")
                .depends_on(key("x", "0002_b"))
                .with_operation(create("C")),
        ])
    }

    fn executor(
        discovery: &StaticDiscovery,
        recorder: MemoryRecorder,
    ) -> ChangeExecutor<Log, MemoryRecorder> {
        let loader = ChangeLoader::load(discovery, Some(&recorder), LoaderConfig::default()).unwrap();
        ChangeExecutor::new(loader, recorder, Log::default())
    }

    #[test]
    fn test_forward_plan_skips_applied() {
        let executor = executor(&chain(), MemoryRecorder::with_applied([key("x", "0001_a")]));
        let plan = executor
            .compute_plan(&[Target::change("x", "0003_c")], false)
            .unwrap();

        assert!(plan.is_all_forwards());
        assert_eq!(
            plan.keys().cloned().collect::<Vec<_>>(),
            vec![key("x", "0002_b"), key("x", "0003_c")]
        );
    }

    #[test]
    fn test_rollback_to_applied_target() {
        let applied = [key("x", "0001_a"), key("x", "0002_b"), key("x", "0003_c")];
        let executor = executor(&chain(), MemoryRecorder::with_applied(applied));

        let plan = executor
            .compute_plan(&[Target::change("x", "0001_a")], false)
            .unwrap();
        assert!(plan.is_all_backwards());
        assert_eq!(
            plan.keys().cloned().collect::<Vec<_>>(),
            vec![key("x", "0003_c"), key("x", "0002_b")]
        );

        let plan = executor.compute_plan(&[Target::zero("x")], false).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.steps[2].key, key("x", "0001_a"));
    }

    #[test]
    fn test_run_forwards_then_backwards() {
        let discovery = chain();
        let mut executor = executor(&discovery, MemoryRecorder::new());

        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        executor = executor.with_progress(move |progress| {
            sink.borrow_mut().push(progress.phase.to_string());
        });

        let targets = executor.leaf_targets();
        let state = executor.run(&targets, None, None, false).unwrap();
        assert_eq!(state.models.len(), 3);
        assert_eq!(executor.backend().statements.len(), 3);
        assert_eq!(executor.backend().commits, 3);
        assert_eq!(executor.recorder().applied().unwrap().len(), 3);
        assert_eq!(events.borrow()[0], "render_start");
        assert_eq!(events.borrow().len(), 2 + 3 * 2);

        let state = executor
            .run(&[Target::change("x", "0001_a")], None, None, false)
            .unwrap();
        assert_eq!(state.models.len(), 1);
        assert!(state.get_model("x", "A").is_some());
        assert_eq!(
            executor.backend().statements[3..],
            ["DROP TABLE C".to_string(), "DROP TABLE B".to_string()]
        );
        assert_eq!(
            executor.recorder().applied().unwrap(),
            BTreeSet::from([key("x", "0001_a")])
        );
    }

    #[test]
    fn test_mixed_plan_rejected() {
        let mut executor = executor(&chain(), MemoryRecorder::with_applied([key("x", "0001_a")]));
        let plan = ChangePlan::from_iter([
            PlanStep::forwards(key("x", "0002_b")),
            PlanStep::backwards(key("x", "0001_a")),
        ]);

        let err = executor.run(&[], Some(plan), None, false).unwrap_err();
        assert!(matches!(err, ChangeError::MixedPlan));
        assert!(executor.backend().statements.is_empty());
    }

    #[test]
    fn test_irreversible_unit_stops_before_backend() {
        let discovery = chain().with_unit(
            ChangeUnit::new("x", "0004_d")
                .depends_on(key("x", "0003_c"))
                .with_operation(Operation::run_command("DELETE FROM C")),
        );
        let applied = [
            key("x", "0001_a"),
            key("x", "0002_b"),
            key("x", "0003_c"),
            key("x", "0004_d"),
        ];
        let mut executor = executor(&discovery, MemoryRecorder::with_applied(applied));

        let err = executor
            .run(&[Target::zero("x")], None, None, false)
            .unwrap_err();
        assert!(matches!(err, ChangeError::Irreversible { .. }));
        assert!(executor.backend().statements.is_empty());
        assert_eq!(executor.recorder().applied().unwrap().len(), 4);

        // Faking needs no backward form.
        executor.run(&[Target::zero("x")], None, None, true).unwrap();
        assert!(executor.recorder().applied().unwrap().is_empty());
        assert!(executor.backend().statements.is_empty());
    }

    #[test]
    fn test_reverse_code_sees_pre_state_of_its_unit() {
        let discovery = StaticDiscovery::new().with_units([
            ChangeUnit::new("x", "0001_a").with_operation(create("A")),
            ChangeUnit::new("x", "0002_b")
                .depends_on(key("x", "0001_a"))
                .with_operation(create("B"))
                .with_operation(Operation::reversible_procedure("audit", "unaudit")),
            ChangeUnit::new("y", "0001_post")
                .depends_on(key("x", "0002_b"))
                .with_operation(
                    Operation::reversible_command("CREATE TABLE Post", "DROP TABLE Post")
                        .with_state_operations(vec![StateOperation::CreateModel {
                            name: "Post".to_string(),
                            fields: vec![FieldState::new("b", "int").with_reference("x.B")],
                        }]),
                ),
            ChangeUnit::new("x", "0003_c")
                .depends_on(key("x", "0002_b"))
                .with_operation(create("C")),
        ]);

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let procedures = ProcedureRegistry::new()
            .with("audit", |_, _| Ok(()))
            .with("unaudit", move |_, state| {
                sink.lock().extend(
                    state.models.keys().map(|(app, model)| format!("{app}.{model}")),
                );
                Ok(())
            });
        let mut executor = executor(&discovery, MemoryRecorder::new()).with_procedures(procedures);

        let targets = executor.leaf_targets();
        executor.run(&targets, None, None, false).unwrap();
        let forwards = executor.backend().statements.len();
        assert!(seen.lock().is_empty());

        let state = executor.run(&[Target::zero("x")], None, None, false).unwrap();
        assert_eq!(*seen.lock(), vec!["x.A".to_string(), "x.B".to_string()]);
        assert!(state.models.is_empty());
        assert!(executor.recorder().applied().unwrap().is_empty());

        let drops = &executor.backend().statements[forwards..];
        let position = |statement: &str| drops.iter().position(|s| s == statement).unwrap();
        assert_eq!(drops.len(), 4);
        assert!(position("DROP TABLE C") < position("DROP TABLE B"));
        assert!(position("DROP TABLE Post") < position("DROP TABLE B"));
        assert_eq!(drops[3], "DROP TABLE A");
    }
}
