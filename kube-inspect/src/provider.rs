//! Cluster provider port and the `kubectl get -o json` dump adapter.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use jobflow::items::Resource;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Source of cluster objects.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn resources(&self) -> Result<Vec<Resource>>;
}

/// Reads a `kubectl get <kinds> -o json` List from disk on every call.
#[derive(Debug, Clone)]
pub struct DumpProvider {
    path: PathBuf,
}

impl DumpProvider {
    /// Fails if `path` is not a readable file.
    pub fn open(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path).with_context(|| format!("open {}", path.display()))?;
        if !meta.is_file() {
            bail!("{} is not a file", path.display());
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

#[async_trait]
impl Provider for DumpProvider {
    async fn resources(&self) -> Result<Vec<Resource>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("read {}", self.path.display()))?;
        let resources = parse_list(&raw).with_context(|| format!("parse {}", self.path.display()))?;
        debug!(path = %self.path.display(), count = resources.len(), "dump loaded");
        Ok(resources)
    }
}

#[derive(Deserialize)]
struct List {
    kind: String,
    #[serde(default)]
    items: Vec<Object>,
}

#[derive(Deserialize)]
struct Object {
    kind: String,
    metadata: Metadata,
    #[serde(default)]
    spec: Value,
}

#[derive(Deserialize)]
struct Metadata {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

/// Parse a kubectl List document.
pub fn parse_list(raw: &str) -> Result<Vec<Resource>> {
    let list: List = serde_json::from_str(raw).context("decode json")?;
    if !list.kind.ends_with("List") {
        bail!("expected a List document, got kind {}", list.kind);
    }
    Ok(list
        .items
        .into_iter()
        .map(|object| Resource {
            images: pod_images(&object.kind, &object.spec),
            kind: object.kind,
            namespace: object.metadata.namespace,
            name: object.metadata.name,
            labels: object.metadata.labels,
        })
        .collect())
}

fn pod_images(kind: &str, spec: &Value) -> Vec<String> {
    let pod = match kind {
        "Pod" => Some(spec),
        "CronJob" => spec.pointer("/jobTemplate/spec/template/spec"),
        _ => spec.pointer("/template/spec"),
    };
    let Some(pod) = pod else {
        return Vec::new();
    };
    ["initContainers", "containers"]
        .iter()
        .filter_map(|field| pod.get(field).and_then(Value::as_array))
        .flatten()
        .filter_map(|container| container.get("image").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}
