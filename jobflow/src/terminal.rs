//! The last step of every run sequence.

use tracing::{error, info};

use crate::errors::FlowError;
use crate::job::Job;

/// Decide the invocation's outcome from the error accumulator.
///
/// Empty accumulator: `complete(message)`. Non-empty: `fail(message, tree)`.
/// Accumulator unreadable: `fail(message, structural error)`.
pub fn terminal_job(message: impl Into<String>) -> Job {
    let message: String = message.into();
    Job::new("terminal", move |ctx, control| {
        let message = message.clone();
        async move {
            let settled = match ctx.errors() {
                Ok(errors) => {
                    let tree = errors.snapshot();
                    if tree.is_empty() {
                        info!(cmd = ctx.cmd(), "no errors reported");
                        control.complete(message)
                    } else {
                        info!(cmd = ctx.cmd(), errors = tree.len(), "errors reported");
                        control.fail(message, FlowError::Accumulated(tree))
                    }
                }
                Err(err) => {
                    error!(%err, "error accumulator unreadable");
                    control.fail(message, FlowError::Context(err))
                }
            };
            settled?;
            Ok(())
        }
    })
}
