//! Model and field layouts tracked by the schema state.

use serde::{Deserialize, Serialize};

/// A field of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldState {
    /// Field name.
    pub name: String,
    /// Backend-specific column kind (e.g. `uuid`, `varchar(255)`).
    pub kind: String,
    /// Whether the field accepts null values.
    #[serde(default)]
    pub nullable: bool,
    /// Relation target as `app.Model`, if this field references another model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
}

impl FieldState {
    /// Create a new non-nullable field.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            nullable: false,
            references: None,
        }
    }

    /// Create a nullable field.
    pub fn nullable(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, kind)
        }
    }

    /// Point this field at another model (`app.Model`).
    pub fn with_reference(mut self, target: impl Into<String>) -> Self {
        self.references = Some(target.into());
        self
    }

    /// Split the relation target into `(app, model)`.
    pub fn reference_parts(&self) -> Option<(&str, &str)> {
        self.references.as_deref().and_then(|t| t.split_once('.'))
    }
}

/// The layout of one model owned by an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelState {
    /// Owning app.
    pub app: String,
    /// Model name.
    pub name: String,
    /// Fields in declaration order.
    pub fields: Vec<FieldState>,
}

impl ModelState {
    /// Create a model with no fields.
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field to the model.
    pub fn with_field(mut self, field: FieldState) -> Self {
        self.fields.push(field);
        self
    }

    /// Get a field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldState> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Position of a field by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Key used by [`SchemaState`](super::SchemaState) for this model.
    pub fn key(&self) -> (String, String) {
        (self.app.clone(), self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_builder() {
        let model = ModelState::new("blog", "Post")
            .with_field(FieldState::new("id", "uuid"))
            .with_field(FieldState::nullable("author", "uuid").with_reference("auth.User"));

        assert_eq!(model.fields.len(), 2);
        assert_eq!(model.field_index("author"), Some(1));
        assert!(model.get_field("author").unwrap().nullable);
        assert_eq!(
            model.get_field("author").unwrap().reference_parts(),
            Some(("auth", "User"))
        );
        assert!(model.get_field("missing").is_none());
    }
}
