//! State projection errors.

use thiserror::Error;

/// Errors raised while mutating or rendering a [`SchemaState`](super::SchemaState).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The model does not exist in the state.
    #[error("model {app}.{model} does not exist")]
    MissingModel {
        /// App owning the model.
        app: String,
        /// Model name.
        model: String,
    },

    /// A model with this name already exists.
    #[error("model {app}.{model} already exists")]
    DuplicateModel {
        /// App owning the model.
        app: String,
        /// Model name.
        model: String,
    },

    /// The field does not exist on the model.
    #[error("field {field} does not exist on {app}.{model}")]
    MissingField {
        /// App owning the model.
        app: String,
        /// Model name.
        model: String,
        /// Field name.
        field: String,
    },

    /// A field with this name already exists on the model.
    #[error("field {field} already exists on {app}.{model}")]
    DuplicateField {
        /// App owning the model.
        app: String,
        /// Model name.
        model: String,
        /// Field name.
        field: String,
    },

    /// A relation points at a model that is not part of the state.
    #[error("field {app}.{model}.{field} references unknown model {target}")]
    UnresolvedReference {
        /// App owning the model.
        app: String,
        /// Model name.
        model: String,
        /// Field name.
        field: String,
        /// The `app.Model` target that could not be resolved.
        target: String,
    },
}
