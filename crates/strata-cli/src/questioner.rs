//! Prompting on the terminal.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::collections::BTreeSet;
use strata_core::Questioner;

/// Asks yes/no questions on the terminal. Anything but `y`/`yes` is no.
#[derive(Debug, Clone, Default)]
pub struct InteractiveQuestioner {
    specified_apps: BTreeSet<String>,
}

impl InteractiveQuestioner {
    /// Apps named on the command line always get an initial unit.
    pub fn new<I, S>(specified_apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            specified_apps: specified_apps.into_iter().map(Into::into).collect(),
        }
    }

    fn ask(&self, question: &str) -> bool {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                tracing::warn!(error = %e, "cannot open terminal");
                return false;
            }
        };
        read_answer(rl.readline(&format!("{question} [y/N] ")))
    }
}

/// Ctrl-C and Ctrl-D answer no.
fn read_answer(line: Result<String, ReadlineError>) -> bool {
    match line {
        Ok(answer) => parse_answer(&answer),
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => false,
        Err(e) => {
            tracing::warn!(error = %e, "cannot read answer");
            false
        }
    }
}

fn parse_answer(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

impl Questioner for InteractiveQuestioner {
    fn ask_initial(&self, app: &str) -> bool {
        self.specified_apps.contains(app)
            || self.ask(&format!("App '{app}' has no changes yet. Create an initial change?"))
    }

    fn ask_merge(&self, app: &str) -> bool {
        self.ask(&format!("Do you want to merge the change branches of '{app}'?"))
    }
}
