//! Kubernetes inspector.
//!
//! Reads a `kubectl get ... -o json` dump and streams the objects in it
//! through a provider/printer pair. `serve` exposes health endpoints until
//! interrupted.

mod app;
mod provider;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use jobflow::config::{FlowConfig, load_config};
use jobflow::flow::{Invocation, root_init};
use jobflow::health::{HealthChecker, serve_job};
use jobflow::printer::StdoutPrinter;
use jobflow::{exit_codes, logging, report};

use crate::app::{Selector, parse_selector};

#[derive(Parser)]
#[command(
    name = "kube-inspect",
    version,
    about = "Inspect Kubernetes objects from a kubectl JSON dump"
)]
struct Cli {
    /// Flow configuration (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List objects as `kind/namespace/name`.
    Resources {
        /// Output of `kubectl get <kinds> -A -o json`.
        #[arg(long)]
        dump: PathBuf,
        /// Label selector, `key=value[,key=value...]`.
        #[arg(long, value_parser = parse_selector)]
        selector: Option<Selector>,
    },
    /// List distinct container images and how many objects use each.
    Images {
        #[arg(long)]
        dump: PathBuf,
    },
    /// Serve `/healthz` and `/readyz` until interrupted.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
        /// Readiness fails until this dump parses.
        #[arg(long)]
        dump: Option<PathBuf>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Resources { .. } => "resources",
            Command::Images { .. } => "images",
            Command::Serve { .. } => "serve",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let code = run(cli).await;
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(cli: Cli) -> i32 {
    let config = match cli.config.as_deref().map(load_config).transpose() {
        Ok(config) => config.unwrap_or_default(),
        Err(err) => {
            eprintln!("{err:#}");
            return exit_codes::FAILED;
        }
    };
    logging::init(&config.log_filter);

    let cmd = format!("kube-inspect {}", cli.command.name());
    let invocation = root(&cmd, &config);
    let invocation = match cli.command {
        Command::Resources { dump, selector } => invocation
            .prepend_init(app::provider_init(dump))
            .message("resources listed")
            .run(app::resources_job(selector.unwrap_or_default())),
        Command::Images { dump } => invocation
            .prepend_init(app::provider_init(dump))
            .message("images listed")
            .run(app::images_job()),
        Command::Serve { addr, dump } => {
            let checker = HealthChecker::new();
            invocation
                .prepend_init(app::readiness_init(dump, checker.clone()))
                .message("server stopped")
                .run(serve_job(addr, checker, config.shutdown_grace()))
        }
    };

    let outcome = invocation.execute().await;
    report::finish(&cmd, &outcome)
}

fn root(cmd: &str, config: &FlowConfig) -> Invocation {
    Invocation::new(cmd)
        .timeout(config.timeout_for(cmd))
        .drain(Some(config.shutdown_grace()))
        .prepend_init(root_init(config.clone(), Arc::new(StdoutPrinter)))
}
