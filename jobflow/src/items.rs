//! Value records moved through streaming pairs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Secret metadata. The plaintext never leaves the key manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    pub key_id: String,
    /// Hex sha256 of the stored value.
    pub fingerprint: String,
}

/// A manifest file read from disk, before secret references are resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub path: PathBuf,
    pub contents: String,
}

/// One cluster object as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Container image references used by the object's pod template.
    #[serde(default)]
    pub images: Vec<String>,
}

impl Resource {
    /// `kind/name` or `kind/namespace/name`.
    pub fn id(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{ns}/{}", self.kind, self.name),
            None => format!("{}/{}", self.kind, self.name),
        }
    }

    /// True if every `key=value` pair in `selector` is among the labels.
    pub fn matches(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(key, value)| self.labels.get(key) == Some(value))
    }
}

/// Container image reference split into repository and tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Image {
    pub repository: String,
    pub tag: String,
}

impl Image {
    /// Parse `repo[:tag][@digest]`. A missing tag is `latest`; a digest wins over the tag.
    pub fn parse(reference: &str) -> Self {
        if let Some((repository, digest)) = reference.split_once('@') {
            let repository = strip_tag(repository).0;
            return Self {
                repository: repository.to_string(),
                tag: digest.to_string(),
            };
        }
        let (repository, tag) = strip_tag(reference);
        Self {
            repository: repository.to_string(),
            tag: tag.unwrap_or("latest").to_string(),
        }
    }
}

// A colon after the last slash is a tag separator; before it, a registry port.
fn strip_tag(reference: &str) -> (&str, Option<&str>) {
    let last_slash = reference.rfind('/').map_or(0, |idx| idx + 1);
    match reference[last_slash..].rfind(':') {
        Some(idx) => {
            let split = last_slash + idx;
            (&reference[..split], Some(&reference[split + 1..]))
        }
        None => (reference, None),
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tag.contains(':') {
            write!(f, "{}@{}", self.repository, self.tag)
        } else {
            write!(f, "{}:{}", self.repository, self.tag)
        }
    }
}

/// Aggregate of one metric over one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub page: String,
    pub metric: String,
    pub count: usize,
    pub mean: f64,
    pub p95: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_parse_handles_tags_ports_and_digests() {
        assert_eq!(
            Image::parse("nginx"),
            Image {
                repository: "nginx".into(),
                tag: "latest".into()
            }
        );
        assert_eq!(Image::parse("nginx:1.27").tag, "1.27");
        let ported = Image::parse("registry.local:5000/team/api");
        assert_eq!(ported.repository, "registry.local:5000/team/api");
        assert_eq!(ported.tag, "latest");
        let pinned = Image::parse("ghcr.io/x/y:1.0@sha256:abc");
        assert_eq!(pinned.repository, "ghcr.io/x/y");
        assert_eq!(pinned.to_string(), "ghcr.io/x/y@sha256:abc");
    }

    #[test]
    fn resource_matches_selector_subset() {
        let resource = Resource {
            kind: "Deployment".into(),
            namespace: Some("prod".into()),
            name: "api".into(),
            labels: BTreeMap::from([
                ("app".to_string(), "api".to_string()),
                ("tier".to_string(), "backend".to_string()),
            ]),
            images: vec![],
        };
        assert_eq!(resource.id(), "Deployment/prod/api");
        assert!(resource.matches(&BTreeMap::new()));
        assert!(resource.matches(&BTreeMap::from([("app".into(), "api".into())])));
        assert!(!resource.matches(&BTreeMap::from([("app".into(), "web".into())])));
    }
}
