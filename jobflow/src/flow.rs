//! Invocation builder: assembles and evaluates one command's flow.
//!
//! ```text
//! parallel(listener, [timeout](sequence(init.., run, terminal)))
//! ```
//!
//! Once Control settles the outcome is fixed, but the run sequence may still
//! be unwinding (a server draining connections). [`Invocation::drain`] bounds
//! how long `execute` waits for it before returning anyway.
//!
//! The builder is a typestate. [`Invocation::run`] consumes an
//! `Invocation<Pending>` and returns an `Invocation<Ready>`, which has no
//! `run` method, so a command tree cannot assign the run job twice and an
//! invocation without a run job cannot execute.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::cancellation_listener;
use crate::combinators::{fail_on_timeout, millis, on_timeout, parallel, sequence};
use crate::config::{CONFIG, FlowConfig};
use crate::context::Context;
use crate::control::{Control, Outcome};
use crate::job::Job;
use crate::printer::{PRINTER, Printer};
use crate::terminal::terminal_job;

/// Run job not yet assigned.
#[derive(Debug)]
pub struct Pending;

/// Run job assigned; the invocation can execute.
#[derive(Debug)]
pub struct Ready;

#[derive(Debug)]
pub struct Invocation<S = Pending> {
    ctx: Context,
    control: Control,
    init: VecDeque<Job>,
    run: Option<Job>,
    timeout: Option<Duration>,
    drain: Option<Duration>,
    message: Option<String>,
    _state: PhantomData<S>,
}

impl Invocation<Pending> {
    pub fn new(cmd: impl Into<String>) -> Self {
        let control = Control::new();
        let ctx = Context::new(cmd, control.token());
        Self {
            ctx,
            control,
            init: VecDeque::new(),
            run: None,
            timeout: None,
            drain: None,
            message: None,
            _state: PhantomData,
        }
    }

    /// Assign the command's main work. Only leaf commands call this.
    pub fn run(self, job: Job) -> Invocation<Ready> {
        debug!(cmd = self.ctx.cmd(), job = job.name(), "run job assigned");
        Invocation {
            ctx: self.ctx,
            control: self.control,
            init: self.init,
            run: Some(job),
            timeout: self.timeout,
            drain: self.drain,
            message: self.message,
            _state: PhantomData,
        }
    }
}

impl<S> Invocation<S> {
    /// Prepend an initializer. Registering parent first and child second
    /// makes the child's initializer run first.
    pub fn prepend_init(mut self, job: Job) -> Self {
        self.init.push_front(job);
        self
    }

    /// Deadline for the whole init/run/terminal sequence.
    pub fn timeout(mut self, after: Option<Duration>) -> Self {
        self.timeout = after;
        self
    }

    /// After the outcome is settled, wait at most `grace` for the run
    /// sequence to return. Without it `execute` returns immediately.
    pub fn drain(mut self, grace: Option<Duration>) -> Self {
        self.drain = grace;
        self
    }

    /// Message passed to `complete`/`fail` by the terminal job.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    /// Names of the init jobs in execution order.
    pub fn init_order(&self) -> Vec<&str> {
        self.init.iter().map(Job::name).collect()
    }
}

impl Invocation<Ready> {
    /// Evaluate the flow with the process SIGINT listener.
    pub async fn execute(self) -> Outcome {
        self.execute_with(cancellation_listener()).await
    }

    /// Evaluate the flow with a custom cancellation listener.
    pub async fn execute_with(self, listener: Job) -> Outcome {
        let drain = self.drain;
        let (flow, finished, ctx, control) = self.into_flow(listener);
        info!(cmd = ctx.cmd(), "flow started");
        if let Err(err) = flow.run(ctx.clone(), control.clone()).await {
            let error = format!("{err:#}");
            warn!(error = %error, "flow returned an error");
        }
        if let Some(grace) = drain
            && tokio::time::timeout(grace, finished.cancelled()).await.is_err()
        {
            warn!(
                cmd = ctx.cmd(),
                grace_ms = millis(grace),
                "run sequence still busy after grace period"
            );
        }
        let outcome = control.outcome();
        info!(cmd = ctx.cmd(), outcome = %outcome.kind(), "flow finished");
        outcome
    }

    /// The assembled flow, a token cancelled once the run sequence returns,
    /// and the context and control the flow must run with.
    fn into_flow(self, listener: Job) -> (Job, CancellationToken, Context, Control) {
        let cmd = self.ctx.cmd().to_string();
        let message = self
            .message
            .unwrap_or_else(|| format!("{cmd} completed"));

        let mut steps: Vec<Job> = self.init.into_iter().collect();
        steps.extend(self.run);
        steps.push(terminal_job(message));

        let finished = CancellationToken::new();
        let mut main = tracked(sequence(cmd.clone(), steps), finished.clone());
        if let Some(after) = self.timeout {
            main = on_timeout(after, main, fail_on_timeout(after));
        }
        (
            parallel(format!("{cmd} flow"), vec![listener, main]),
            finished,
            self.ctx,
            self.control,
        )
    }
}

// Cancels `finished` when `job` returns or unwinds.
fn tracked(job: Job, finished: CancellationToken) -> Job {
    Job::new(job.name().to_string(), move |ctx, control| {
        let job = job.clone();
        let guard = finished.clone().drop_guard();
        async move {
            let _guard = guard;
            job.run(ctx, control).await
        }
    })
}

/// Root initializer shared by every tool: stores the configuration and
/// the printer for the jobs that follow.
pub fn root_init(config: FlowConfig, printer: Arc<dyn Printer>) -> Job {
    Job::new("root init", move |ctx, _control| {
        let config = config.clone();
        let printer = printer.clone();
        async move {
            ctx.set(&CONFIG, config)?;
            ctx.set(&PRINTER, printer)?;
            Ok(())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::OutcomeKind;
    use crate::printer::CapturePrinter;
    use crate::test_support::{ManualSignal, Recorder};

    #[tokio::test]
    async fn initializers_run_child_first_then_run_then_terminal() {
        let rec = Recorder::new();
        let (_signal, listener) = ManualSignal::pair();
        let outcome = Invocation::new("tool sub")
            .prepend_init(rec.job("root init"))
            .prepend_init(rec.job("sub init"))
            .run(rec.job("run"))
            .execute_with(listener)
            .await;

        assert_eq!(rec.events(), vec!["sub init", "root init", "run"]);
        assert!(matches!(
            outcome,
            Outcome::Completed { message } if message == "tool sub completed"
        ));
    }

    #[test]
    fn init_order_reflects_prepending() {
        let rec = Recorder::new();
        let inv = Invocation::new("a b c")
            .prepend_init(rec.job("a"))
            .prepend_init(rec.job("b"))
            .prepend_init(rec.job("c"));
        assert_eq!(inv.init_order(), vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn custom_message_reaches_terminal_job() {
        let (_signal, listener) = ManualSignal::pair();
        let outcome = Invocation::new("x")
            .message("all good")
            .run(Job::noop("run"))
            .execute_with(listener)
            .await;
        assert!(matches!(outcome, Outcome::Completed { message } if message == "all good"));
    }

    #[tokio::test]
    async fn failing_init_is_reported_through_the_tree() {
        let rec = Recorder::new();
        let (_signal, listener) = ManualSignal::pair();
        let outcome = Invocation::new("x")
            .prepend_init(rec.reporting_job("adapter", "bad uri"))
            .run(rec.job("run"))
            .execute_with(listener)
            .await;
        assert_eq!(outcome.kind(), OutcomeKind::Failed);
        assert_eq!(rec.events(), vec!["adapter", "run"]);
    }

    #[tokio::test]
    async fn root_init_exposes_config_and_printer_to_the_run_job() {
        let printer = CapturePrinter::new();
        let (_signal, listener) = ManualSignal::pair();
        let config = FlowConfig {
            stream_buffer: 7,
            ..FlowConfig::default()
        };
        let run = Job::new("run", |ctx, _control| async move {
            let config = ctx.require(&CONFIG)?;
            ctx.require(&PRINTER)?
                .print(&format!("buffer={}", config.stream_buffer))?;
            Ok(())
        });
        let outcome = Invocation::new("x")
            .prepend_init(root_init(config, Arc::new(printer.clone())))
            .run(run)
            .execute_with(listener)
            .await;
        assert_eq!(outcome.kind(), OutcomeKind::Completed);
        assert_eq!(printer.lines(), vec!["buffer=7"]);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_the_run_sequence_to_unwind() {
        let rec = Recorder::new();
        let (mut signal, listener) = ManualSignal::pair();
        let unwinding = rec.clone();
        let run = Job::new("server", move |ctx, _control| {
            let rec = unwinding.clone();
            async move {
                rec.record("serving");
                ctx.done().await;
                tokio::time::sleep(Duration::from_millis(200)).await;
                rec.record("drained");
                Ok(())
            }
        });
        let flow = tokio::spawn(
            Invocation::new("serve")
                .drain(Some(Duration::from_secs(1)))
                .run(run)
                .execute_with(listener),
        );
        while rec.events().is_empty() {
            tokio::task::yield_now().await;
        }
        signal.raise(crate::control::Signal::Interrupt);

        let outcome = flow.await.expect("join");
        assert_eq!(outcome.kind(), OutcomeKind::Canceled);
        assert_eq!(rec.events(), vec!["serving", "drained"]);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_after_grace() {
        let rec = Recorder::new();
        let (_signal, listener) = ManualSignal::pair();
        let started = tokio::time::Instant::now();
        let outcome = Invocation::new("x")
            .timeout(Some(Duration::from_millis(100)))
            .drain(Some(Duration::from_millis(50)))
            .run(rec.sleeping_job("slow", Duration::from_secs(10)))
            .execute_with(listener)
            .await;
        assert_eq!(outcome.kind(), OutcomeKind::Failed);
        assert_eq!(started.elapsed(), Duration::from_millis(150));
        assert!(rec.events().is_empty());
    }
}
