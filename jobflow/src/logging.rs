//! Tracing setup shared by every tool binary.
//!
//! Diagnostics only: nothing here influences flow outcome. Command output goes
//! to stdout through the tools' printers, tracing goes to stderr.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; falls back to `default_filter` (usually
/// [`crate::config::FlowConfig::log_filter`]) if unset or unparsable.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=jobflow=debug secrets list
/// ```
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
