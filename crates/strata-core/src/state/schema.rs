//! Schema state - a snapshot of every model at one point of a plan.

use super::{ModelState, StateError};
use std::collections::{BTreeMap, BTreeSet};

/// The rendered projection of a [`SchemaState`].
///
/// Rendering indexes the models per app and checks that every relation
/// target resolves. It is the expensive step of building a state, so it
/// happens at most once per state and is kept in sync afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedSchema {
    apps: BTreeMap<String, BTreeSet<String>>,
}

impl RenderedSchema {
    /// Apps that own at least one model.
    pub fn apps(&self) -> impl Iterator<Item = &str> {
        self.apps.keys().map(|s| s.as_str())
    }

    /// Model names owned by an app, in lexicographic order.
    pub fn models(&self, app: &str) -> Vec<&str> {
        self.apps
            .get(app)
            .map(|models| models.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default()
    }

    /// Whether the projection contains the model.
    pub fn contains(&self, app: &str, model: &str) -> bool {
        self.apps.get(app).is_some_and(|models| models.contains(model))
    }

    /// Total number of models.
    pub fn model_count(&self) -> usize {
        self.apps.values().map(BTreeSet::len).sum()
    }

    fn insert(&mut self, app: &str, model: &str) {
        self.apps
            .entry(app.to_string())
            .or_default()
            .insert(model.to_string());
    }

    fn remove(&mut self, app: &str, model: &str) {
        if let Some(models) = self.apps.get_mut(app) {
            models.remove(model);
            if models.is_empty() {
                self.apps.remove(app);
            }
        }
    }
}

/// A snapshot of the schema: models keyed by `(app, model)` plus the apps
/// that have no change-units and are taken as they are.
#[derive(Debug, Clone, Default)]
pub struct SchemaState {
    /// Apps without change-units; their live schema is used as-is.
    pub real_apps: BTreeSet<String>,
    /// Models keyed by `(app, model)`.
    pub models: BTreeMap<(String, String), ModelState>,
    rendered: Option<RenderedSchema>,
}

impl PartialEq for SchemaState {
    fn eq(&self, other: &Self) -> bool {
        self.real_apps == other.real_apps && self.models == other.models
    }
}

impl Eq for SchemaState {}

impl SchemaState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state seeded with apps that have no change-units.
    pub fn with_real_apps<I, S>(apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            real_apps: apps.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add a model to the state.
    pub fn add_model(&mut self, model: ModelState) -> Result<(), StateError> {
        let key = model.key();
        if self.models.contains_key(&key) {
            return Err(StateError::DuplicateModel {
                app: key.0,
                model: key.1,
            });
        }
        self.models.insert(key.clone(), model);
        self.reload_model(&key.0, &key.1);
        Ok(())
    }

    /// Remove a model from the state, returning it.
    pub fn remove_model(&mut self, app: &str, name: &str) -> Result<ModelState, StateError> {
        let model = self
            .models
            .remove(&(app.to_string(), name.to_string()))
            .ok_or_else(|| StateError::MissingModel {
                app: app.to_string(),
                model: name.to_string(),
            })?;
        self.reload_model(app, name);
        Ok(model)
    }

    /// Get a model.
    pub fn get_model(&self, app: &str, name: &str) -> Option<&ModelState> {
        self.models.get(&(app.to_string(), name.to_string()))
    }

    /// Get a model for modification.
    ///
    /// Field changes do not alter the rendered model index, so no reload is
    /// needed afterwards.
    pub fn model_mut(&mut self, app: &str, name: &str) -> Result<&mut ModelState, StateError> {
        self.models
            .get_mut(&(app.to_string(), name.to_string()))
            .ok_or_else(|| StateError::MissingModel {
                app: app.to_string(),
                model: name.to_string(),
            })
    }

    /// All models of an app.
    pub fn models_in<'a>(&'a self, app: &'a str) -> impl Iterator<Item = &'a ModelState> + 'a {
        self.models.values().filter(move |m| m.app == app)
    }

    /// Whether the projection has been rendered.
    pub fn is_rendered(&self) -> bool {
        self.rendered.is_some()
    }

    /// The rendered projection, if any.
    pub fn rendered(&self) -> Option<&RenderedSchema> {
        self.rendered.as_ref()
    }

    /// Render the projection, validating every relation target.
    ///
    /// Returns the cached projection when already rendered.
    pub fn render(&mut self) -> Result<&RenderedSchema, StateError> {
        if self.rendered.is_none() {
            let mut rendered = RenderedSchema::default();
            for (app, name) in self.models.keys() {
                rendered.insert(app, name);
            }
            for model in self.models.values() {
                for field in &model.fields {
                    let Some((target_app, target_model)) = field.reference_parts() else {
                        continue;
                    };
                    if self.real_apps.contains(target_app)
                        || rendered.contains(target_app, target_model)
                    {
                        continue;
                    }
                    return Err(StateError::UnresolvedReference {
                        app: model.app.clone(),
                        model: model.name.clone(),
                        field: field.name.clone(),
                        target: field.references.clone().unwrap_or_default(),
                    });
                }
            }
            self.rendered = Some(rendered);
        }
        Ok(self.rendered.get_or_insert_with(RenderedSchema::default))
    }

    /// Drop the rendered projection.
    pub fn clear_rendered(&mut self) {
        self.rendered = None;
    }

    /// Keep an existing rendering in sync after a model was added or removed.
    fn reload_model(&mut self, app: &str, name: &str) {
        let present = self.models.contains_key(&(app.to_string(), name.to_string()));
        if let Some(rendered) = self.rendered.as_mut() {
            if present {
                rendered.insert(app, name);
            } else {
                rendered.remove(app, name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FieldState;

    fn user() -> ModelState {
        ModelState::new("auth", "User").with_field(FieldState::new("id", "uuid"))
    }

    fn post() -> ModelState {
        ModelState::new("blog", "Post")
            .with_field(FieldState::new("id", "uuid"))
            .with_field(FieldState::new("author", "uuid").with_reference("auth.User"))
    }

    #[test]
    fn test_add_and_remove_model() {
        let mut state = SchemaState::new();
        state.add_model(user()).unwrap();
        assert!(state.get_model("auth", "User").is_some());

        let err = state.add_model(user()).unwrap_err();
        assert!(matches!(err, StateError::DuplicateModel { .. }));

        state.remove_model("auth", "User").unwrap();
        assert!(state.get_model("auth", "User").is_none());
        assert!(matches!(
            state.remove_model("auth", "User"),
            Err(StateError::MissingModel { .. })
        ));
    }

    #[test]
    fn test_render_resolves_references() {
        let mut state = SchemaState::new();
        state.add_model(user()).unwrap();
        state.add_model(post()).unwrap();

        assert!(!state.is_rendered());
        let rendered = state.render().unwrap();
        assert_eq!(rendered.model_count(), 2);
        assert_eq!(rendered.models("blog"), vec!["Post"]);
        assert!(state.is_rendered());
    }

    #[test]
    fn test_render_accepts_real_app_targets() {
        let mut state = SchemaState::with_real_apps(["auth"]);
        state.add_model(post()).unwrap();
        assert!(state.render().is_ok());
    }

    #[test]
    fn test_render_rejects_unresolved_reference() {
        let mut state = SchemaState::new();
        state.add_model(post()).unwrap();

        let err = state.render().unwrap_err();
        assert!(matches!(err, StateError::UnresolvedReference { ref target, .. } if target == "auth.User"));
        assert!(!state.is_rendered());
    }

    #[test]
    fn test_rendering_follows_mutations() {
        let mut state = SchemaState::new();
        state.add_model(user()).unwrap();
        state.render().unwrap();

        state.add_model(post()).unwrap();
        assert!(state.rendered().unwrap().contains("blog", "Post"));

        state.remove_model("blog", "Post").unwrap();
        assert!(!state.rendered().unwrap().contains("blog", "Post"));
        assert_eq!(state.rendered().unwrap().apps().collect::<Vec<_>>(), vec!["auth"]);
    }

    #[test]
    fn test_equality_ignores_rendering() {
        let mut rendered = SchemaState::new();
        rendered.add_model(user()).unwrap();
        let plain = rendered.clone();
        rendered.render().unwrap();

        assert_eq!(rendered, plain);
    }
}
