//! Handlers, initializers and run jobs for the inspector commands.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use jobflow::config::CONFIG;
use jobflow::context::{Context, Key};
use jobflow::handler::{CommandHandler, QueryHandler};
use jobflow::health::HealthChecker;
use jobflow::items::{Image, Resource};
use jobflow::job::Job;
use jobflow::printer::PRINTER;
use jobflow::stream::{StreamReceiver, StreamSender, run_pair};
use tracing::{debug, info};

use crate::provider::{DumpProvider, Provider};

/// Label selector: every pair must match.
pub type Selector = BTreeMap<String, String>;

/// Parse `key=value[,key=value...]`.
pub fn parse_selector(raw: &str) -> Result<Selector, String> {
    raw.split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(format!("invalid selector term {pair:?}, expected key=value")),
        })
        .collect()
}

/// Stream every resource matching `selector`.
pub struct ListResources {
    pub selector: Selector,
    pub out: StreamSender<Resource>,
}

pub struct ListResourcesHandler {
    provider: Arc<dyn Provider>,
}

#[async_trait]
impl CommandHandler<ListResources> for ListResourcesHandler {
    async fn handle(&self, mut request: ListResources) -> Result<()> {
        for resource in self.provider.resources().await? {
            if resource.matches(&request.selector) {
                request.out.send(resource).await?;
            }
        }
        debug!(sent = request.out.sent(), "resources listed");
        Ok(())
    }
}

/// Distinct images across the streamed resources, with how many resources use each.
pub struct CollectImagesHandler;

#[async_trait]
impl QueryHandler<StreamReceiver<Resource>> for CollectImagesHandler {
    type Output = BTreeMap<Image, usize>;

    async fn handle(&self, mut input: StreamReceiver<Resource>) -> Result<Self::Output> {
        let mut images = BTreeMap::new();
        while let Some(resource) = input.recv().await {
            let mut seen: Vec<Image> = resource.images.iter().map(|r| Image::parse(r)).collect();
            seen.sort();
            seen.dedup();
            for image in seen {
                *images.entry(image).or_insert(0) += 1;
            }
        }
        Ok(images)
    }
}

pub type Lister = Arc<dyn CommandHandler<ListResources>>;

pub const LIST_RESOURCES: Key<Lister> = Key::new("kube.list_resources");

/// Subcommand initializer: open the dump and build the list handler.
///
/// Failures are reported under `init/provider`; the run job then has nothing to do.
pub fn provider_init(dump: PathBuf) -> Job {
    Job::new("provider init", move |ctx, _control| {
        let dump = dump.clone();
        async move {
            match DumpProvider::open(&dump) {
                Ok(provider) => {
                    let handler: Lister = Arc::new(ListResourcesHandler {
                        provider: Arc::new(provider),
                    });
                    ctx.set(&LIST_RESOURCES, handler)?;
                }
                Err(err) => ctx.errors()?.add_at(&["init", "provider"], &err),
            }
            Ok(())
        }
    })
}

/// Subcommand initializer for `serve`: readiness follows the provider.
pub fn readiness_init(dump: Option<PathBuf>, checker: HealthChecker) -> Job {
    Job::new("readiness init", move |_ctx, _control| {
        let dump = dump.clone();
        let checker = checker.clone();
        async move {
            checker.register("provider");
            let Some(dump) = dump else {
                checker.set("provider", Ok(()));
                return Ok(());
            };
            let loaded = match DumpProvider::open(&dump) {
                Ok(provider) => provider.resources().await.map(|r| r.len()),
                Err(err) => Err(err),
            };
            match loaded {
                Ok(count) => {
                    info!(count, "provider ready");
                    checker.set("provider", Ok(()));
                }
                Err(err) => checker.set("provider", Err(format!("{err:#}"))),
            }
            Ok(())
        }
    })
}

/// The list handler and channel capacity, or `None` if the initializer failed.
fn lister(ctx: &Context) -> Result<Option<(Lister, usize)>> {
    let Some(lister) = ctx.lookup(&LIST_RESOURCES)? else {
        debug!("no list handler, skipping run");
        return Ok(None);
    };
    Ok(Some((lister, ctx.require(&CONFIG)?.stream_buffer)))
}

/// `resources`: print `kind/namespace/name` per matching resource.
pub fn resources_job(selector: Selector) -> Job {
    Job::new("resources", move |ctx, _control| {
        let selector = selector.clone();
        async move {
            let Some((lister, buffer)) = lister(&ctx)? else {
                return Ok(());
            };
            let printer = ctx.require(&PRINTER)?;
            run_pair(
                &ctx,
                "resources",
                buffer,
                move |out| async move { lister.handle(ListResources { selector, out }).await },
                move |mut input| async move {
                    while let Some(resource) = input.recv().await {
                        printer.print(&resource.id())?;
                    }
                    Ok(())
                },
            )
            .await?;
            Ok(())
        }
    })
}

/// `images`: print each distinct image and its usage count, sorted.
pub fn images_job() -> Job {
    Job::new("images", |ctx, _control| async move {
        let Some((lister, buffer)) = lister(&ctx)? else {
            return Ok(());
        };
        let printer = ctx.require(&PRINTER)?;
        run_pair(
            &ctx,
            "images",
            buffer,
            move |out| async move {
                lister
                    .handle(ListResources {
                        selector: Selector::new(),
                        out,
                    })
                    .await
            },
            move |input| async move {
                let images = CollectImagesHandler.handle(input).await?;
                for (image, count) in &images {
                    printer.print(&format!("{image}\t{count}"))?;
                }
                Ok(())
            },
        )
        .await?;
        Ok(())
    })
}
