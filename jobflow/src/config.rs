//! Flow configuration shared by the tools (`--config <path>`, TOML).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::context::Key;
use crate::stream::DEFAULT_BUFFER;

/// Context slot holding the loaded configuration.
pub const CONFIG: Key<FlowConfig> = Key::new("config");

/// Flow configuration (TOML).
///
/// Missing fields default to the values every tool ships with, so an empty
/// or absent file is a valid configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FlowConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,

    /// Seconds a background server may take to shut down after the flow is done.
    pub shutdown_grace_secs: u64,

    /// Capacity of producer/consumer channels.
    pub stream_buffer: usize,

    /// Deadline for commands without an entry in `timeouts`. Unset means no deadline.
    pub default_timeout_secs: Option<u64>,

    /// Per-command deadlines in seconds, keyed by command id (e.g. `"ux-export export"`).
    pub timeouts: BTreeMap<String, u64>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            log_filter: "warn".to_string(),
            shutdown_grace_secs: 5,
            stream_buffer: DEFAULT_BUFFER,
            default_timeout_secs: None,
            timeouts: BTreeMap::new(),
        }
    }
}

impl FlowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.log_filter.trim().is_empty() {
            return Err(anyhow!("log_filter must not be empty"));
        }
        if self.stream_buffer == 0 {
            return Err(anyhow!("stream_buffer must be > 0"));
        }
        if self.default_timeout_secs == Some(0) {
            return Err(anyhow!("default_timeout_secs must be > 0 when set"));
        }
        if let Some((cmd, _)) = self.timeouts.iter().find(|(_, secs)| **secs == 0) {
            return Err(anyhow!("timeouts.\"{cmd}\" must be > 0"));
        }
        Ok(())
    }

    /// Deadline for `cmd`: its own entry, else the default, else none.
    pub fn timeout_for(&self, cmd: &str) -> Option<Duration> {
        self.timeouts
            .get(cmd)
            .copied()
            .or(self.default_timeout_secs)
            .map(Duration::from_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FlowConfig::default()`.
pub fn load_config(path: &Path) -> Result<FlowConfig> {
    if !path.exists() {
        let cfg = FlowConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FlowConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
