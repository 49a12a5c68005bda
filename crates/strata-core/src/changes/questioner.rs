//! Questions asked while authoring changes.

use std::collections::BTreeSet;

/// Answers the decisions that authoring leaves to a human.
pub trait Questioner {
    /// Whether to create a first unit for an app that has none.
    fn ask_initial(&self, app: &str) -> bool;

    /// Whether to write a merge unit for a conflicting app.
    fn ask_merge(&self, app: &str) -> bool;
}

/// Answers from fixed defaults.
///
/// Apps named explicitly by the caller always get an initial unit.
#[derive(Debug, Clone, Default)]
pub struct NonInteractiveQuestioner {
    specified_apps: BTreeSet<String>,
    initial: bool,
    merge: bool,
}

impl NonInteractiveQuestioner {
    /// Answer no to everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apps the caller asked for by name.
    pub fn with_specified_apps<I, S>(mut self, apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.specified_apps = apps.into_iter().map(Into::into).collect();
        self
    }

    /// Default answer for [`Questioner::ask_initial`].
    pub fn with_initial(mut self, initial: bool) -> Self {
        self.initial = initial;
        self
    }

    /// Default answer for [`Questioner::ask_merge`].
    pub fn with_merge(mut self, merge: bool) -> Self {
        self.merge = merge;
        self
    }

    /// Apps the caller asked for by name.
    pub fn specified_apps(&self) -> &BTreeSet<String> {
        &self.specified_apps
    }
}

impl Questioner for NonInteractiveQuestioner {
    fn ask_initial(&self, app: &str) -> bool {
        self.specified_apps.contains(app) || self.initial
    }

    fn ask_merge(&self, _app: &str) -> bool {
        self.merge
    }
}
