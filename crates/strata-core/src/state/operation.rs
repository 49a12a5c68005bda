//! State-only operations.

use super::{FieldState, ModelState, SchemaState, StateError};
use serde::{Deserialize, Serialize};

/// A mutation of the schema state with no backend effect of its own.
///
/// These describe what a raw backend command does to the model layout when
/// that effect cannot be inferred from the command text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StateOperation {
    /// Create a model.
    CreateModel {
        /// Model name.
        name: String,
        /// Initial fields.
        #[serde(default)]
        fields: Vec<FieldState>,
    },
    /// Delete a model.
    DeleteModel {
        /// Model name.
        name: String,
    },
    /// Rename a model, rewriting relations that point at it.
    RenameModel {
        /// Current name.
        old_name: String,
        /// New name.
        new_name: String,
    },
    /// Add a field to a model.
    AddField {
        /// Model name.
        model: String,
        /// The new field.
        field: FieldState,
    },
    /// Remove a field from a model.
    RemoveField {
        /// Model name.
        model: String,
        /// Field name.
        name: String,
    },
    /// Replace a field definition, keeping its position.
    AlterField {
        /// Model name.
        model: String,
        /// The new definition; its name selects the field.
        field: FieldState,
    },
    /// Rename a field.
    RenameField {
        /// Model name.
        model: String,
        /// Current name.
        old_name: String,
        /// New name.
        new_name: String,
    },
}

impl StateOperation {
    /// Apply this operation to `state` on behalf of `app`.
    pub fn state_forwards(&self, app: &str, state: &mut SchemaState) -> Result<(), StateError> {
        match self {
            StateOperation::CreateModel { name, fields } => {
                let mut model = ModelState::new(app, name.as_str());
                model.fields = fields.clone();
                state.add_model(model)
            }
            StateOperation::DeleteModel { name } => state.remove_model(app, name).map(|_| ()),
            StateOperation::RenameModel { old_name, new_name } => {
                if state.get_model(app, new_name).is_some() {
                    return Err(StateError::DuplicateModel {
                        app: app.to_string(),
                        model: new_name.clone(),
                    });
                }
                let mut model = state.remove_model(app, old_name)?;
                model.name = new_name.clone();
                state.add_model(model)?;

                let old_target = format!("{app}.{old_name}");
                let new_target = format!("{app}.{new_name}");
                for model in state.models.values_mut() {
                    for field in &mut model.fields {
                        if field.references.as_deref() == Some(old_target.as_str()) {
                            field.references = Some(new_target.clone());
                        }
                    }
                }
                Ok(())
            }
            StateOperation::AddField { model, field } => {
                let target = state.model_mut(app, model)?;
                if target.get_field(&field.name).is_some() {
                    return Err(duplicate_field(app, model, &field.name));
                }
                target.fields.push(field.clone());
                Ok(())
            }
            StateOperation::RemoveField { model, name } => {
                let target = state.model_mut(app, model)?;
                let index = target
                    .field_index(name)
                    .ok_or_else(|| missing_field(app, model, name))?;
                target.fields.remove(index);
                Ok(())
            }
            StateOperation::AlterField { model, field } => {
                let target = state.model_mut(app, model)?;
                let index = target
                    .field_index(&field.name)
                    .ok_or_else(|| missing_field(app, model, &field.name))?;
                target.fields[index] = field.clone();
                Ok(())
            }
            StateOperation::RenameField {
                model,
                old_name,
                new_name,
            } => {
                let target = state.model_mut(app, model)?;
                if target.get_field(new_name).is_some() {
                    return Err(duplicate_field(app, model, new_name));
                }
                let index = target
                    .field_index(old_name)
                    .ok_or_else(|| missing_field(app, model, old_name))?;
                target.fields[index].name = new_name.clone();
                Ok(())
            }
        }
    }

    /// Human-readable description.
    pub fn describe(&self) -> String {
        match self {
            StateOperation::CreateModel { name, .. } => format!("Create model {name}"),
            StateOperation::DeleteModel { name } => format!("Delete model {name}"),
            StateOperation::RenameModel { old_name, new_name } => {
                format!("Rename model {old_name} to {new_name}")
            }
            StateOperation::AddField { model, field } => {
                format!("Add field {} to {model}", field.name)
            }
            StateOperation::RemoveField { model, name } => format!("Remove field {name} from {model}"),
            StateOperation::AlterField { model, field } => {
                format!("Alter field {} on {model}", field.name)
            }
            StateOperation::RenameField {
                model,
                old_name,
                new_name,
            } => format!("Rename field {old_name} on {model} to {new_name}"),
        }
    }
}

fn missing_field(app: &str, model: &str, field: &str) -> StateError {
    StateError::MissingField {
        app: app.to_string(),
        model: model.to_string(),
        field: field.to_string(),
    }
}

fn duplicate_field(app: &str, model: &str, field: &str) -> StateError {
    StateError::DuplicateField {
        app: app.to_string(),
        model: model.to_string(),
        field: field.to_string(),
    }
}
