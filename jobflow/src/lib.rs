//! Per-invocation job-flow engine shared by the inspector, secrets and export tools.
//!
//! One command invocation is a tree of [`job::Job`]s evaluated against a single
//! [`context::Context`] and a single [`control::Control`]:
//!
//! - **[`context`]**: typed, key-addressed store threaded through every job.
//! - **[`errors`]**: keyed hierarchical error tree that independent jobs report into.
//! - **[`control`]**: terminal-once outcome handle; its token is the flow's `done` signal.
//! - **[`combinators`]**: sequence, parallel, conditional, background and timeout guard.
//! - **[`cancel`]** and **[`stream`]**: SIGINT listener and the producer/consumer pair.
//! - **[`terminal`]**: the last step of every run, converting accumulated errors to an outcome.
//!
//! [`flow`] assembles these into `Parallel(listener, Sequence(init.., run, terminal))`
//! and [`report`] maps the final [`control::Outcome`] to stderr output and an exit code.
//!
//! Tools plug in through [`handler`] traits, write command output through a
//! [`printer::Printer`], share the payload types in [`items`] and may expose
//! [`health`] probes. [`config`] and [`logging`] are the ambient setup.

pub mod cancel;
pub mod combinators;
pub mod config;
pub mod context;
pub mod control;
pub mod errors;
pub mod exit_codes;
pub mod flow;
pub mod handler;
pub mod health;
pub mod items;
pub mod job;
pub mod logging;
pub mod printer;
pub mod report;
pub mod stream;
pub mod terminal;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
