//! Metrics source port and the results-directory adapter.
//!
//! Each run of the browser driver leaves one JSON file:
//!
//! ```json
//! {"page": "/checkout", "metrics": {"lcp_ms": 1830.5, "cls": 0.02}}
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use walkdir::WalkDir;

/// One measured value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub page: String,
    pub metric: String,
    pub value: f64,
}

/// Where per-run measurements come from.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Run identifiers in a stable order.
    async fn runs(&self) -> Result<Vec<PathBuf>>;

    /// Samples recorded by one run.
    async fn read(&self, run: &Path) -> Result<Vec<Sample>>;
}

#[derive(Debug, Deserialize)]
struct RunFile {
    page: String,
    metrics: BTreeMap<String, f64>,
}

/// `*.json` files anywhere under a directory.
#[derive(Debug, Clone)]
pub struct ResultsDir {
    root: PathBuf,
}

impl ResultsDir {
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            bail!("results directory {} not found", root.display());
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }
}

#[async_trait]
impl MetricsSource for ResultsDir {
    async fn runs(&self) -> Result<Vec<PathBuf>> {
        let mut runs = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walk {}", self.root.display()))?;
            let path = entry.path();
            if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "json") {
                runs.push(path.to_path_buf());
            }
        }
        Ok(runs)
    }

    async fn read(&self, run: &Path) -> Result<Vec<Sample>> {
        let raw = tokio::fs::read_to_string(run)
            .await
            .with_context(|| format!("read {}", run.display()))?;
        let file: RunFile = serde_json::from_str(&raw).context("parse run file")?;
        Ok(file
            .metrics
            .into_iter()
            .map(|(metric, value)| Sample {
                page: file.page.clone(),
                metric,
                value,
            })
            .collect())
    }
}
