//! Strata Core - dependency graph, planner and executor for schema changes.
//!
//! This crate provides the change-unit model, the dependency graph over
//! change-units from independent apps, the loader that discovers and links
//! them, and the executor that plans and runs them against a backend.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod backend;
pub mod changes;
pub mod clock;
pub mod discovery;
pub mod error;
pub mod state;

pub use backend::{Backend, BackendError, JournalBackend, SchemaEditor};
pub use changes::{
    arrange_for_graph, ChangeError, ChangeExecutor, ChangeGraph, ChangeKey, ChangeLoader,
    ChangePlan, ChangeUnit, ChangeWriter, Direction, LoaderConfig, MemoryRecorder, MergePlan,
    NonInteractiveQuestioner, Operation, Phase, PlanStep, ProcedureRegistry, Progress,
    Questioner, Recorder, SledRecorder, Target,
};
pub use discovery::{Discovered, DirectoryDiscovery, Discovery, StaticDiscovery};
pub use error::Error;
pub use state::{FieldState, ModelState, RenderedSchema, SchemaState, StateError, StateOperation};
