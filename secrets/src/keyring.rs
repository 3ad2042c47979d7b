//! Key manager port and the local TOML keyring adapter.
//!
//! ```toml
//! [secrets.db_password]
//! key_id = "projects/acme/keys/app"
//! value = "s3cr3t"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use jobflow::items::Secret;
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Access to stored secrets.
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Metadata for every secret, sorted by name.
    async fn list(&self) -> Result<Vec<Secret>>;

    /// Plaintext of the secret called `name`.
    async fn decrypt(&self, name: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyringFile {
    #[serde(default)]
    secrets: BTreeMap<String, Entry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Entry {
    key_id: String,
    value: String,
}

/// Keyring loaded once from a TOML file.
#[derive(Debug)]
pub struct Keyring {
    entries: BTreeMap<String, Entry>,
}

impl Keyring {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parse {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let file: KeyringFile = toml::from_str(raw)?;
        if let Some((name, _)) = file.secrets.iter().find(|(_, e)| e.key_id.trim().is_empty()) {
            return Err(anyhow!("secret {name} has an empty key_id"));
        }
        Ok(Self {
            entries: file.secrets,
        })
    }
}

#[async_trait]
impl KeyManager for Keyring {
    async fn list(&self) -> Result<Vec<Secret>> {
        Ok(self
            .entries
            .iter()
            .map(|(name, entry)| Secret {
                name: name.clone(),
                key_id: entry.key_id.clone(),
                fingerprint: fingerprint(&entry.value),
            })
            .collect())
    }

    async fn decrypt(&self, name: &str) -> Result<String> {
        self.entries
            .get(name)
            .map(|entry| entry.value.clone())
            .ok_or_else(|| anyhow!("unknown secret {name}"))
    }
}

/// Hex sha256 of `value`.
pub fn fingerprint(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}
