//! Combinators that compose jobs into a flow.
//!
//! None of them kill work: a branch that is no longer awaited keeps running
//! until it observes [`Context::done`](crate::context::Context::done) on its own.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::{debug, error, warn};

use crate::context::Context;
use crate::control::Control;
use crate::errors::FlowError;
use crate::job::Job;

/// Run `jobs` in listed order.
///
/// Stops before the next job once Control is terminal. An `Err` from a job is
/// logged and the sequence continues.
pub fn sequence(name: impl Into<String>, jobs: Vec<Job>) -> Job {
    let jobs: Arc<[Job]> = jobs.into();
    Job::new(name, move |ctx, control| {
        let jobs = jobs.clone();
        async move {
            for job in &*jobs {
                if control.is_terminal() {
                    debug!(next = job.name(), "control settled, stopping sequence");
                    break;
                }
                if let Err(err) = job.run(ctx.clone(), control.clone()).await {
                    let error = format!("{err:#}");
                    warn!(job = job.name(), error = %error, "job returned an error");
                }
            }
            Ok(())
        }
    })
}

/// Start every job concurrently.
///
/// Returns as soon as Control is terminal, or once all branches returned.
/// Branches still running at that point are detached, not aborted. A branch
/// that panics is recorded under `panic/<job>` in the error accumulator.
pub fn parallel(name: impl Into<String>, jobs: Vec<Job>) -> Job {
    let jobs: Arc<[Job]> = jobs.into();
    Job::new(name, move |ctx, control| {
        let jobs = jobs.clone();
        async move {
            let mut branches: FuturesUnordered<_> = jobs
                .iter()
                .map(|job| {
                    let name = job.name().to_string();
                    let handle = tokio::spawn(job.run(ctx.clone(), control.clone()));
                    async move { (name, handle.await) }
                })
                .collect();

            loop {
                tokio::select! {
                    _ = control.settled() => {
                        debug!(running = branches.len(), "control settled, leaving parallel");
                        break;
                    }
                    next = branches.next() => match next {
                        None => break,
                        Some((name, Ok(Ok(())))) => debug!(job = %name, "branch finished"),
                        Some((name, Ok(Err(err)))) => {
                            let error = format!("{err:#}");
                            warn!(job = %name, error = %error, "branch returned an error");
                        }
                        Some((name, Err(join_err))) => {
                            error!(job = %name, error = %join_err, "branch panicked");
                            ctx.errors()?.add_at(&["panic", name.as_str()], &join_err);
                        }
                    }
                }
            }
            Ok(())
        }
    })
}

/// Run `job` only if `predicate` holds.
///
/// The predicate is checked once, when the combinator itself runs, so it can
/// read values stored by earlier initializers.
pub fn when<P>(predicate: P, job: Job) -> Job
where
    P: Fn(&Context) -> bool + Send + Sync + 'static,
{
    let predicate = Arc::new(predicate);
    Job::new(format!("when {}", job.name()), move |ctx, control| {
        let predicate = predicate.clone();
        let job = job.clone();
        async move {
            if !predicate(&ctx) {
                debug!(job = job.name(), "condition false, job skipped");
                return Ok(());
            }
            job.run(ctx, control).await
        }
    })
}

/// Start `job` in its own task and return immediately.
///
/// The job must terminate by observing `ctx.done()`.
pub fn background(job: Job) -> Job {
    Job::new(format!("background {}", job.name()), move |ctx, control| {
        let job = job.clone();
        async move {
            debug!(job = job.name(), "starting background job");
            tokio::spawn(async move {
                if let Err(err) = job.run(ctx, control).await {
                    let error = format!("{err:#}");
                    warn!(job = job.name(), error = %error, "background job returned an error");
                }
            });
            Ok(())
        }
    })
}

/// Run `job` under a wall-clock deadline.
///
/// If `job` has neither returned nor settled Control within `after`,
/// `on_timeout(ctx, control, id)` is called with the job's name as `id`; it
/// must fail the flow. The job itself keeps running as an orphaned task.
pub fn on_timeout<F>(after: Duration, job: Job, on_timeout: F) -> Job
where
    F: Fn(&Context, &Control, &str) + Send + Sync + 'static,
{
    let on_timeout = Arc::new(on_timeout);
    Job::new(format!("timeout {}", job.name()), move |ctx, control| {
        let job = job.clone();
        let on_timeout = on_timeout.clone();
        async move {
            let id = job.name().to_string();
            let mut handle = tokio::spawn(job.run(ctx.clone(), control.clone()));
            tokio::select! {
                joined = &mut handle => match joined {
                    Ok(result) => result,
                    Err(join_err) => Err(anyhow!("{id} panicked: {join_err}")),
                },
                _ = control.settled() => Ok(()),
                _ = tokio::time::sleep(after) => {
                    if control.is_terminal() {
                        return Ok(());
                    }
                    warn!(id = %id, after_ms = millis(after), "deadline expired, job orphaned");
                    on_timeout(&ctx, &control, &id);
                    Ok(())
                }
            }
        }
    })
}

/// Whole milliseconds of `d` for log fields, saturating at `u64::MAX`.
pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Standard timeout callback: fail the flow with [`FlowError::Timeout`].
pub fn fail_on_timeout(after: Duration) -> impl Fn(&Context, &Control, &str) + Send + Sync + 'static {
    move |_ctx, control, id| {
        let error = FlowError::Timeout {
            id: id.to_string(),
            after,
        };
        if let Err(err) = control.fail(format!("{id} timed out"), error) {
            debug!(%err, "flow settled before timeout callback");
        }
    }
}
