//! Secrets manager.
//!
//! Lists secret metadata from a local keyring and resolves
//! `${secret:NAME}` references in manifest files.

mod app;
mod keyring;
mod template;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use jobflow::config::{FlowConfig, load_config};
use jobflow::flow::{Invocation, root_init};
use jobflow::printer::StdoutPrinter;
use jobflow::{exit_codes, logging, report};

#[derive(Parser)]
#[command(name = "secrets", version, about = "Inspect secrets and decrypt manifests")]
struct Cli {
    /// Flow configuration (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keyring file.
    #[arg(long, global = true, default_value = "keyring.toml")]
    keyring: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print name, key id and sha256 fingerprint of every secret.
    List,
    /// Resolve secret references and write `<file>.decrypted` per manifest.
    Decrypt {
        /// Print the result instead of writing files.
        #[arg(long)]
        stdout: bool,
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::List => "list",
            Command::Decrypt { .. } => "decrypt",
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

    let cmd = format!("secrets {}", cli.command.name());
    let invocation = root(&cmd, &config).prepend_init(app::keyring_init(cli.keyring));
    let invocation = match cli.command {
        Command::List => invocation.message("secrets listed").run(app::list_job()),
        Command::Decrypt { stdout, manifests } => {
            let count = manifests.len();
            invocation
                .message(format!("{count} manifest(s) processed"))
                .run(app::decrypt_job(manifests, stdout))
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
