//! The atomic unit of orchestrated work.
//!
//! A [`Job`] is a named async function of `(Context, Control)`. Its `Err`
//! return is advisory: combinators log it and move on, and only the error
//! accumulator plus [`Control`] decide the invocation's outcome.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{Instrument, debug_span};

use crate::context::Context;
use crate::control::Control;

pub type JobResult = anyhow::Result<()>;

type JobFn = dyn Fn(Context, Control) -> BoxFuture<'static, JobResult> + Send + Sync;

/// Cloneable, named unit of work.
#[derive(Clone)]
pub struct Job {
    name: Arc<str>,
    run: Arc<JobFn>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Job").field(&self.name).finish()
    }
}

impl Job {
    /// Build a job from an async closure.
    ///
    /// ```
    /// use jobflow::job::Job;
    ///
    /// let hello = Job::new("hello", |ctx, _control| async move {
    ///     tracing::info!(cmd = ctx.cmd(), "hello");
    ///     Ok(())
    /// });
    /// assert_eq!(hello.name(), "hello");
    /// ```
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Context, Control) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            run: Arc::new(move |ctx, control| Box::pin(f(ctx, control))),
        }
    }

    /// A job that does nothing.
    pub fn noop(name: impl Into<String>) -> Self {
        Self::new(name, |_, _| async { Ok(()) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the job inside a `job` span carrying its name and command.
    pub fn run(&self, ctx: Context, control: Control) -> BoxFuture<'static, JobResult> {
        let span = debug_span!("job", name = %self.name, cmd = ctx.cmd());
        Box::pin((self.run)(ctx, control).instrument(span))
    }
}
