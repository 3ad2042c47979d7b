//! Handlers, initializers and run jobs for the secrets commands.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use jobflow::config::CONFIG;
use jobflow::context::Key;
use jobflow::handler::{CommandHandler, QueryHandler};
use jobflow::items::{Manifest, Secret};
use jobflow::job::Job;
use jobflow::printer::{PRINTER, Printer};
use jobflow::stream::{StreamSender, run_pair};
use tracing::{debug, info};

use crate::keyring::{KeyManager, Keyring};
use crate::template;

/// Stream metadata for every secret.
pub struct ListSecrets {
    pub out: StreamSender<Secret>,
}

pub struct ListSecretsHandler {
    keys: Arc<dyn KeyManager>,
}

#[async_trait]
impl CommandHandler<ListSecrets> for ListSecretsHandler {
    async fn handle(&self, mut request: ListSecrets) -> Result<()> {
        for secret in self.keys.list().await? {
            request.out.send(secret).await?;
        }
        Ok(())
    }
}

/// Resolves every `${secret:NAME}` reference of one manifest.
pub struct DecryptHandler {
    keys: Arc<dyn KeyManager>,
}

#[async_trait]
impl QueryHandler<Manifest> for DecryptHandler {
    type Output = String;

    async fn handle(&self, manifest: Manifest) -> Result<String> {
        let mut values = BTreeMap::new();
        let mut missing = Vec::new();
        for name in template::references(&manifest.contents)? {
            match self.keys.decrypt(name).await {
                Ok(value) => {
                    values.insert(name.to_string(), value);
                }
                Err(err) => missing.push(format!("{err:#}")),
            }
        }
        if !missing.is_empty() {
            anyhow::bail!("{}", missing.join("; "));
        }
        debug!(path = %manifest.path.display(), resolved = values.len(), "manifest resolved");
        template::substitute(&manifest.contents, &values)
    }
}

pub type Lister = Arc<dyn CommandHandler<ListSecrets>>;
pub type Decrypter = Arc<dyn QueryHandler<Manifest, Output = String>>;

pub const LIST_SECRETS: Key<Lister> = Key::new("secrets.list");
pub const DECRYPT: Key<Decrypter> = Key::new("secrets.decrypt");

/// Subcommand initializer: load the keyring and build both handlers.
///
/// Failures are reported under `init/keyring`.
pub fn keyring_init(path: PathBuf) -> Job {
    Job::new("keyring init", move |ctx, _control| {
        let path = path.clone();
        async move {
            let keyring = match Keyring::load(&path) {
                Ok(keyring) => keyring,
                Err(err) => {
                    ctx.errors()?.add_at(&["init", "keyring"], &err);
                    return Ok(());
                }
            };
            let keys: Arc<dyn KeyManager> = Arc::new(keyring);
            let lister: Lister = Arc::new(ListSecretsHandler { keys: keys.clone() });
            let decrypter: Decrypter = Arc::new(DecryptHandler { keys });
            ctx.set(&LIST_SECRETS, lister)?;
            ctx.set(&DECRYPT, decrypter)?;
            Ok(())
        }
    })
}

/// `list`: print `name<TAB>key_id<TAB>fingerprint` per secret.
pub fn list_job() -> Job {
    Job::new("list", |ctx, _control| async move {
        let Some(lister) = ctx.lookup(&LIST_SECRETS)? else {
            return Ok(());
        };
        let printer = ctx.require(&PRINTER)?;
        let buffer = ctx.require(&CONFIG)?.stream_buffer;
        run_pair(
            &ctx,
            "list",
            buffer,
            move |out| async move { lister.handle(ListSecrets { out }).await },
            move |mut input| async move {
                while let Some(secret) = input.recv().await {
                    printer.print(&format!(
                        "{}\t{}\t{}",
                        secret.name, secret.key_id, secret.fingerprint
                    ))?;
                }
                Ok(())
            },
        )
        .await?;
        Ok(())
    })
}

/// `decrypt`: resolve each manifest and write `<file>.decrypted`, or print
/// it when `to_stdout`.
///
/// A failure on one manifest is recorded under `decrypt/<file>` and the
/// remaining manifests are still processed.
pub fn decrypt_job(paths: Vec<PathBuf>, to_stdout: bool) -> Job {
    let paths: Arc<[PathBuf]> = paths.into();
    Job::new("decrypt", move |ctx, _control| {
        let paths = paths.clone();
        async move {
            let Some(decrypter) = ctx.lookup(&DECRYPT)? else {
                return Ok(());
            };
            let printer = ctx.require(&PRINTER)?;
            let buffer = ctx.require(&CONFIG)?.stream_buffer;
            let read_errors = ctx.errors()?;
            let write_errors = read_errors.clone();

            run_pair(
                &ctx,
                "decrypt",
                buffer,
                move |mut out| async move {
                    for path in &*paths {
                        match tokio::fs::read_to_string(path).await {
                            Ok(contents) => {
                                out.send(Manifest {
                                    path: path.clone(),
                                    contents,
                                })
                                .await?;
                            }
                            Err(err) => {
                                let key = path.display().to_string();
                                read_errors
                                    .add_at(&["decrypt", key.as_str()], format!("read: {err}"));
                            }
                        }
                    }
                    Ok(())
                },
                move |mut input| async move {
                    while let Some(manifest) = input.recv().await {
                        let key = manifest.path.display().to_string();
                        if let Err(err) = emit(&decrypter, &*printer, manifest, to_stdout).await {
                            write_errors.add_at(&["decrypt", key.as_str()], &err);
                        }
                    }
                    Ok(())
                },
            )
            .await?;
            Ok(())
        }
    })
}

async fn emit(
    decrypter: &Decrypter,
    printer: &dyn Printer,
    manifest: Manifest,
    to_stdout: bool,
) -> Result<()> {
    let path = manifest.path.clone();
    let text = decrypter.handle(manifest).await?;
    if to_stdout {
        printer.write(&text)?;
        return Ok(());
    }
    let target = write_decrypted(&path, &text).await?;
    info!(target = %target.display(), "manifest decrypted");
    printer.print(&format!("wrote {}", target.display()))?;
    Ok(())
}

/// `<file>.decrypted` beside the source manifest.
pub fn decrypted_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".decrypted");
    PathBuf::from(name)
}

async fn write_decrypted(path: &Path, text: &str) -> Result<PathBuf> {
    let target = decrypted_path(path);
    tokio::fs::write(&target, text)
        .await
        .with_context(|| format!("write {}", target.display()))?;
    Ok(target)
}
