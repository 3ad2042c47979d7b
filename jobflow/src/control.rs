//! Terminal-once outcome handle passed to every job.
//!
//! The first of [`Control::complete`], [`Control::fail`] or [`Control::cancel`]
//! decides the invocation's [`Outcome`] and cancels the flow token, which is
//! what long-running jobs observe through [`crate::context::Context::done`].
//! Later terminal calls are rejected and counted as double fires.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::FlowError;

/// External interrupt that cancelled the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT (Ctrl-C).
    Interrupt,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => f.write_str("interrupt"),
        }
    }
}

/// Final result of one invocation.
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed { message: String },
    Failed { message: String, error: FlowError },
    Canceled { signal: Signal },
    /// No job drove the flow to a terminal state (also the state while running).
    Incomplete,
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Completed { .. } => OutcomeKind::Completed,
            Outcome::Failed { .. } => OutcomeKind::Failed,
            Outcome::Canceled { .. } => OutcomeKind::Canceled,
            Outcome::Incomplete => OutcomeKind::Incomplete,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Incomplete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Completed,
    Failed,
    Canceled,
    Incomplete,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OutcomeKind::Completed => "completed",
            OutcomeKind::Failed => "failed",
            OutcomeKind::Canceled => "canceled",
            OutcomeKind::Incomplete => "incomplete",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("flow already {current}; ignored attempt to mark it {attempted}")]
    AlreadyTerminal {
        current: OutcomeKind,
        attempted: OutcomeKind,
    },
}

struct Inner {
    state: Mutex<Outcome>,
    token: CancellationToken,
    double_fires: AtomicUsize,
}

/// Cooperative completion/cancellation handle. Clones share one state.
#[derive(Clone)]
pub struct Control {
    inner: Arc<Inner>,
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Control")
            .field("outcome", &self.outcome().kind())
            .field("double_fires", &self.double_fires())
            .finish()
    }
}

impl Default for Control {
    fn default() -> Self {
        Self::new()
    }
}

impl Control {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(Outcome::Incomplete),
                token: CancellationToken::new(),
                double_fires: AtomicUsize::new(0),
            }),
        }
    }

    pub fn complete(&self, message: impl Into<String>) -> Result<(), ControlError> {
        self.settle(Outcome::Completed {
            message: message.into(),
        })
    }

    pub fn fail(&self, message: impl Into<String>, error: FlowError) -> Result<(), ControlError> {
        self.settle(Outcome::Failed {
            message: message.into(),
            error,
        })
    }

    pub fn cancel(&self, signal: Signal) -> Result<(), ControlError> {
        self.settle(Outcome::Canceled { signal })
    }

    pub fn is_terminal(&self) -> bool {
        self.lock().is_terminal()
    }

    /// Snapshot of the current outcome ([`Outcome::Incomplete`] while running).
    pub fn outcome(&self) -> Outcome {
        self.lock().clone()
    }

    /// Number of terminal calls rejected because the flow was already settled.
    pub fn double_fires(&self) -> usize {
        self.inner.double_fires.load(Ordering::SeqCst)
    }

    /// The flow token, cancelled exactly when the outcome is settled.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Wait until some job settles the outcome.
    pub async fn settled(&self) {
        self.inner.token.cancelled().await;
    }

    fn settle(&self, outcome: Outcome) -> Result<(), ControlError> {
        let mut state = self.lock();
        if state.is_terminal() {
            self.inner.double_fires.fetch_add(1, Ordering::SeqCst);
            let err = ControlError::AlreadyTerminal {
                current: state.kind(),
                attempted: outcome.kind(),
            };
            warn!(%err, "terminal control called twice");
            return Err(err);
        }
        info!(outcome = %outcome.kind(), "flow settled");
        *state = outcome;
        // Cancel before releasing the lock: a settled outcome implies a cancelled token.
        self.inner.token.cancel();
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Outcome> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
