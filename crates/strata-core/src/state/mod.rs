//! In-memory schema state projected by replaying change-units.
//!
//! A [`SchemaState`] is the model layout at one point of a plan. Change-units
//! mutate it through [`StateOperation`]s without touching any backend.

mod error;
mod model;
mod operation;
mod schema;

pub use error::StateError;
pub use model::{FieldState, ModelState};
pub use operation::StateOperation;
pub use schema::{RenderedSchema, SchemaState};
