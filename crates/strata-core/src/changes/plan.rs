//! Plans: ordered `(unit, direction)` steps for one run.

use super::ChangeKey;
use std::fmt;

/// What a run should bring an app to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target {
    /// The app.
    pub app: String,
    /// The unit to end at, or `None` to unapply the whole app.
    pub name: Option<String>,
}

impl Target {
    /// Unapply every unit of an app.
    pub fn zero(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: None,
        }
    }

    /// End at a specific unit.
    pub fn change(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: Some(name.into()),
        }
    }

    /// The unit key, if the target names one.
    pub fn key(&self) -> Option<ChangeKey> {
        self.name
            .as_ref()
            .map(|name| ChangeKey::new(self.app.as_str(), name.as_str()))
    }
}

impl From<ChangeKey> for Target {
    fn from(key: ChangeKey) -> Self {
        Self {
            app: key.app,
            name: Some(key.name),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}.{}", self.app, name),
            None => write!(f, "{}.zero", self.app),
        }
    }
}

/// Direction of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Apply the unit.
    Forwards,
    /// Unapply the unit.
    Backwards,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forwards => write!(f, "forwards"),
            Direction::Backwards => write!(f, "backwards"),
        }
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    /// The unit.
    pub key: ChangeKey,
    /// Apply or unapply.
    pub direction: Direction,
}

impl PlanStep {
    /// A forward step.
    pub fn forwards(key: ChangeKey) -> Self {
        Self {
            key,
            direction: Direction::Forwards,
        }
    }

    /// A backward step.
    pub fn backwards(key: ChangeKey) -> Self {
        Self {
            key,
            direction: Direction::Backwards,
        }
    }
}

/// An ordered list of steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePlan {
    /// Steps in execution order.
    pub steps: Vec<PlanStep>,
}

impl ChangePlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    pub fn push(&mut self, step: PlanStep) {
        self.steps.push(step);
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Keys in execution order.
    pub fn keys(&self) -> impl Iterator<Item = &ChangeKey> {
        self.steps.iter().map(|step| &step.key)
    }

    /// Whether every step applies.
    pub fn is_all_forwards(&self) -> bool {
        self.steps
            .iter()
            .all(|step| step.direction == Direction::Forwards)
    }

    /// Whether every step unapplies.
    pub fn is_all_backwards(&self) -> bool {
        self.steps
            .iter()
            .all(|step| step.direction == Direction::Backwards)
    }

    /// Whether the plan holds both directions.
    pub fn is_mixed(&self) -> bool {
        !self.is_all_forwards() && !self.is_all_backwards()
    }

    /// Index of the step for a key.
    pub fn position(&self, key: &ChangeKey) -> Option<usize> {
        self.steps.iter().position(|step| step.key == *key)
    }

    /// Steps going one way.
    pub fn steps_in_direction(&self, direction: Direction) -> impl Iterator<Item = &PlanStep> {
        self.steps
            .iter()
            .filter(move |step| step.direction == direction)
    }
}

impl FromIterator<PlanStep> for ChangePlan {
    fn from_iter<I: IntoIterator<Item = PlanStep>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}
