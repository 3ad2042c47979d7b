//! Initializers and the export run job.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use jobflow::config::CONFIG;
use jobflow::context::{Context, Key};
use jobflow::handler::{CommandHandler, QueryHandler};
use jobflow::health::HealthChecker;
use jobflow::items::Summary;
use jobflow::job::Job;
use jobflow::printer::PRINTER;
use jobflow::stream::run_pair;
use tokio::sync::Mutex;
use tracing::info;

use crate::source::{MetricsSource, ResultsDir};
use crate::summary::{Format, ReportWriter, SummarizeHandler, WriteReport};

pub const SOURCE: Key<Arc<dyn MetricsSource>> = Key::new("ux.source");

/// Subcommand initializer: open the results directory.
///
/// Failures are reported under `init/source`; the readiness check follows.
pub fn source_init(results: PathBuf, checker: HealthChecker) -> Job {
    Job::new("source init", move |ctx, _control| {
        let results = results.clone();
        let checker = checker.clone();
        async move {
            checker.register("source");
            match ResultsDir::open(&results) {
                Ok(source) => {
                    let source: Arc<dyn MetricsSource> = Arc::new(source);
                    ctx.set(&SOURCE, source)?;
                    checker.set("source", Ok(()));
                }
                Err(err) => {
                    checker.set("source", Err(format!("{err:#}")));
                    ctx.errors()?.add_at(&["init", "source"], &err);
                }
            }
            Ok(())
        }
    })
}

/// Options of one export.
#[derive(Debug, Clone)]
pub struct Export {
    pub out: PathBuf,
    pub format: Format,
}

/// `export`: stream samples from every run, aggregate, write the report.
///
/// An unreadable run is recorded under `export/<file>` and skipped.
pub fn export_job(export: Export) -> Job {
    Job::new("export", move |ctx, _control| {
        let export = export.clone();
        async move {
            let Some(source) = ctx.lookup(&SOURCE)? else {
                return Ok(());
            };
            let buffer = ctx.require(&CONFIG)?.stream_buffer;
            let Some((runs, summaries)) = stream_and_summarize(&ctx, source, buffer).await? else {
                return Ok(());
            };

            let rows = summaries.len();
            let request = WriteReport {
                summaries,
                runs,
                out: export.out.clone(),
                format: export.format,
            };
            if let Err(err) = ReportWriter.handle(request).await {
                ctx.errors()?.add_at(&["export", "write"], &err);
                return Ok(());
            }
            info!(runs, rows, out = %export.out.display(), "report written");
            ctx.require(&PRINTER)?.print(&format!(
                "exported {rows} row(s) from {runs} run(s) to {}",
                export.out.display()
            ))?;
            Ok(())
        }
    })
}

async fn stream_and_summarize(
    ctx: &Context,
    source: Arc<dyn MetricsSource>,
    buffer: usize,
) -> Result<Option<(usize, Vec<Summary>)>> {
    let errors = ctx.errors()?;
    let read = Arc::new(AtomicUsize::new(0));
    let read_count = read.clone();
    let summaries = Arc::new(Mutex::new(Vec::new()));
    let sink = summaries.clone();

    let outcome = run_pair(
        ctx,
        "export",
        buffer,
        move |mut out| async move {
            for run in source.runs().await? {
                match source.read(&run).await {
                    Ok(samples) => {
                        read_count.fetch_add(1, Ordering::Relaxed);
                        for sample in samples {
                            out.send(sample).await?;
                        }
                    }
                    Err(err) => {
                        let key = run.display().to_string();
                        errors.add_at(&["export", key.as_str()], &err);
                    }
                }
            }
            Ok(())
        },
        move |input| async move {
            *sink.lock().await = SummarizeHandler.handle(input).await?;
            Ok(())
        },
    )
    .await?;

    if !outcome.is_ok() {
        return Ok(None);
    }
    let runs = read.load(Ordering::Relaxed);
    let summaries = std::mem::take(&mut *summaries.lock().await);
    Ok(Some((runs, summaries)))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use jobflow::config::FlowConfig;
    use jobflow::control::{Outcome, OutcomeKind};
    use jobflow::flow::{Invocation, root_init};
    use jobflow::printer::CapturePrinter;
    use jobflow::test_support::ManualSignal;

    use super::*;

    async fn run(results: &Path, export: Export) -> (Outcome, CapturePrinter, HealthChecker) {
        let printer = CapturePrinter::new();
        let checker = HealthChecker::new();
        let (_signal, listener) = ManualSignal::pair();
        let outcome = Invocation::new("ux-export export")
            .prepend_init(root_init(FlowConfig::default(), Arc::new(printer.clone())))
            .prepend_init(source_init(results.to_path_buf(), checker.clone()))
            .run(export_job(export))
            .execute_with(listener)
            .await;
        (outcome, printer, checker)
    }

    fn write_run(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).expect("write run");
    }

    #[tokio::test]
    async fn exports_csv_summary() {
        let temp = tempfile::tempdir().expect("tempdir");
        let results = temp.path().join("results");
        std::fs::create_dir(&results).expect("mkdir");
        write_run(&results, "1.json", r#"{"page": "/", "metrics": {"lcp_ms": 100}}"#);
        write_run(&results, "2.json", r#"{"page": "/", "metrics": {"lcp_ms": 300}}"#);
        let out = temp.path().join("ux.csv");

        let (outcome, printer, checker) = run(
            &results,
            Export {
                out: out.clone(),
                format: Format::Csv,
            },
        )
        .await;

        assert_eq!(outcome.kind(), OutcomeKind::Completed);
        assert!(checker.is_ready());
        assert_eq!(
            std::fs::read_to_string(&out).expect("csv"),
            "page,metric,count,mean,p95\n/,lcp_ms,2,200.000,300.000\n"
        );
        assert_eq!(
            printer.lines(),
            vec![format!("exported 1 row(s) from 2 run(s) to {}", out.display())]
        );
    }

    #[tokio::test]
    async fn bad_run_is_reported_but_others_are_exported() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_run(temp.path(), "good.json", r#"{"page": "/", "metrics": {"cls": 0.1}}"#);
        write_run(temp.path(), "torn.json", r#"{"page": "/", "metr"#);
        let out = temp.path().join("out").join("ux.json");

        let (outcome, _printer, _checker) = run(
            temp.path(),
            Export {
                out: out.clone(),
                format: Format::Json,
            },
        )
        .await;

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).expect("json")).expect("parse");
        assert_eq!(report["runs"], 1);
        assert_eq!(report["summaries"][0]["metric"], "cls");

        let Outcome::Failed { error, .. } = outcome else {
            panic!("expected failure");
        };
        let rendered = error.to_string();
        assert!(rendered.starts_with("export:\n  "), "{rendered}");
        assert!(rendered.contains("torn.json: parse run file"), "{rendered}");
    }

    #[tokio::test]
    async fn missing_results_dir_fails_readiness_and_init() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (outcome, printer, checker) = run(
            &temp.path().join("absent"),
            Export {
                out: temp.path().join("ux.json"),
                format: Format::Json,
            },
        )
        .await;

        assert!(!checker.is_ready());
        assert_eq!(outcome.kind(), OutcomeKind::Failed);
        assert!(printer.lines().is_empty());
        assert!(!temp.path().join("ux.json").exists());
    }
}
