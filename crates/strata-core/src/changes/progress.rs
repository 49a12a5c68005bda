//! Progress notifications emitted while a plan runs.

use super::ChangeUnit;
use std::fmt;

/// Run phase reported to the progress observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The one-time state render is starting.
    RenderStart,
    /// The state render finished.
    RenderSuccess,
    /// A unit is about to be applied.
    ApplyStart,
    /// A unit was applied and recorded.
    ApplySuccess,
    /// A unit is about to be unapplied.
    UnapplyStart,
    /// A unit was unapplied and its record removed.
    UnapplySuccess,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Phase::RenderStart => "render_start",
            Phase::RenderSuccess => "render_success",
            Phase::ApplyStart => "apply_start",
            Phase::ApplySuccess => "apply_success",
            Phase::UnapplyStart => "unapply_start",
            Phase::UnapplySuccess => "unapply_success",
        };
        f.write_str(tag)
    }
}

/// One progress notification.
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    /// The phase.
    pub phase: Phase,
    /// The unit concerned; absent for render phases.
    pub change: Option<&'a ChangeUnit>,
    /// Whether the unit is faked.
    pub fake: bool,
}

/// Observer called with every notification. It cannot affect the run.
pub type ProgressCallback = Box<dyn FnMut(&Progress<'_>)>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_tags() {
        assert_eq!(Phase::RenderStart.to_string(), "render_start");
        assert_eq!(Phase::UnapplySuccess.to_string(), "unapply_success");
    }
}
