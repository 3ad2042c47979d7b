//! Stable exit codes for every tool built on the flow engine.

/// The flow completed.
pub const OK: i32 = 0;
/// The flow failed (accumulated errors, structural fault or timeout).
pub const FAILED: i32 = 1;
/// The flow ended without any job reaching a terminal outcome.
pub const INCOMPLETE: i32 = 2;
/// The user interrupted the flow (128 + SIGINT).
pub const CANCELED: i32 = 130;
