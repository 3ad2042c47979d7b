//! UX metrics exporter.
//!
//! Aggregates per-run browser measurements into a JSON or CSV report,
//! optionally exposing health probes while it works.

mod app;
mod source;
mod summary;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use jobflow::combinators::{background, when};
use jobflow::config::{FlowConfig, load_config};
use jobflow::flow::{Invocation, root_init};
use jobflow::health::{HealthChecker, serve_job};
use jobflow::printer::StdoutPrinter;
use jobflow::{exit_codes, logging, report};

use crate::app::Export;
use crate::summary::Format;

#[derive(Parser)]
#[command(name = "ux-export", version, about = "Summarize UX metrics from run results")]
struct Cli {
    /// Flow configuration (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize every run under a results directory.
    Export {
        #[arg(long)]
        results: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
        /// Serve /healthz and /readyz for the duration of the export.
        #[arg(long)]
        health: bool,
        #[arg(long, default_value = "127.0.0.1:9090")]
        health_addr: SocketAddr,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Export { .. } => "export",
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

    let cmd = format!("ux-export {}", cli.command.name());
    let invocation = match cli.command {
        Command::Export {
            results,
            out,
            format,
            health,
            health_addr,
        } => {
            let checker = HealthChecker::new();
            let server = serve_job(health_addr, checker.clone(), config.shutdown_grace());
            root(&cmd, &config)
                .prepend_init(when(move |_| health, background(server)))
                .prepend_init(app::source_init(results, checker))
                .message(format!("report written to {}", out.display()))
                .run(app::export_job(Export { out, format }))
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
