//! User-facing rendering of a finished flow.

use crate::control::Outcome;
use crate::errors::FlowError;
use crate::exit_codes;

/// Exit code for `outcome`.
pub fn exit_code(outcome: &Outcome) -> i32 {
    match outcome {
        Outcome::Completed { .. } => exit_codes::OK,
        Outcome::Failed { .. } => exit_codes::FAILED,
        Outcome::Canceled { .. } => exit_codes::CANCELED,
        Outcome::Incomplete => exit_codes::INCOMPLETE,
    }
}

/// Text for stderr, or `None` when there is nothing to report.
///
/// Failures print the full keyed error tree; cancellation prints a distinct
/// message and never the tree.
pub fn render(cmd: &str, outcome: &Outcome) -> Option<String> {
    match outcome {
        Outcome::Completed { .. } => None,
        Outcome::Failed {
            message,
            error: FlowError::Accumulated(tree),
        } => {
            let body = tree
                .to_string()
                .lines()
                .map(|line| format!("  {line}"))
                .collect::<Vec<_>>()
                .join("\n");
            Some(format!(
                "{cmd} failed: {message} ({} error(s))\n{body}",
                tree.len()
            ))
        }
        Outcome::Failed { message, error } => Some(format!("{cmd} failed: {message}: {error}")),
        Outcome::Canceled { signal } => Some(format!("{cmd} canceled by user ({signal})")),
        Outcome::Incomplete => Some(format!("{cmd} ended without an outcome")),
    }
}

/// Print the report to stderr and return the exit code.
pub fn finish(cmd: &str, outcome: &Outcome) -> i32 {
    if let Some(text) = render(cmd, outcome) {
        eprintln!("{text}");
    }
    exit_code(outcome)
}
