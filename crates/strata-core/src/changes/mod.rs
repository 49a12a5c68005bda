//! Change engine for Strata.
//!
//! This module provides dependency-ordered schema evolution with:
//! - Named change-units grouped by app, linked by dependency edges
//! - Symbolic references (`__first__`, `__latest__`) and `run_before` hints
//! - Cycle, missing-node, conflict and history consistency checks
//! - Forward and backward planning between applied and target states
//! - State replay in the exact order the backend sees the changes
//!
//! # Example
//!
//! ```ignore
//! use strata_core::changes::{ChangeExecutor, ChangeLoader, LoaderConfig, Target};
//!
//! // Discover units and read the applied set
//! let loader = ChangeLoader::load(&discovery, Some(&recorder), LoaderConfig::default())?;
//!
//! // Plan towards every leaf
//! let mut executor = ChangeExecutor::new(loader, recorder, backend);
//! executor.preflight()?;
//! let targets = executor.leaf_targets();
//! let plan = executor.compute_plan(&targets, false)?;
//!
//! // Run it
//! let state = executor.run(&targets, Some(plan), None, false)?;
//! ```

pub mod autodetector;
pub mod error;
pub mod executor;
pub mod graph;
pub mod loader;
pub mod merge;
pub mod operation;
pub mod plan;
pub mod progress;
pub mod questioner;
pub mod recorder;
pub mod unit;
pub mod writer;

// Unit types
pub use unit::{ChangeKey, ChangeUnit, FIRST, LATEST};

// Operation types
pub use operation::{Operation, Procedure, ProcedureRegistry, Statement, Statements};

// Error types
pub use error::ChangeError;

// Graph and loader
pub use graph::ChangeGraph;
pub use loader::{ChangeLoader, LoaderConfig};

// Plan and execution
pub use executor::ChangeExecutor;
pub use plan::{ChangePlan, Direction, PlanStep, Target};
pub use progress::{Phase, Progress, ProgressCallback};

// Persistence
pub use recorder::{AppliedRecord, MemoryRecorder, Recorder, SledRecorder};

// Authoring
pub use autodetector::{arrange_for_graph, parse_number, suggest_name};
pub use merge::{MergeBranch, MergePlan};
pub use questioner::{NonInteractiveQuestioner, Questioner};
pub use writer::ChangeWriter;
