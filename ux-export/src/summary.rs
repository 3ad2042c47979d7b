//! Aggregation of samples into per-page summaries, and report rendering.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use clap::ValueEnum;
use jobflow::handler::{CommandHandler, QueryHandler};
use jobflow::items::Summary;
use jobflow::stream::StreamReceiver;
use serde::Serialize;
use tracing::debug;

use crate::source::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Csv,
}

/// Drains samples and returns one [`Summary`] per (page, metric), sorted.
pub struct SummarizeHandler;

#[async_trait]
impl QueryHandler<StreamReceiver<Sample>> for SummarizeHandler {
    type Output = Vec<Summary>;

    async fn handle(&self, mut input: StreamReceiver<Sample>) -> Result<Vec<Summary>> {
        let mut groups: BTreeMap<(String, String), Vec<f64>> = BTreeMap::new();
        while let Some(sample) = input.recv().await {
            groups
                .entry((sample.page, sample.metric))
                .or_default()
                .push(sample.value);
        }
        debug!(samples = input.received(), groups = groups.len(), "samples aggregated");
        Ok(groups
            .into_iter()
            .map(|((page, metric), values)| summarize(page, metric, values))
            .collect())
    }
}

fn summarize(page: String, metric: String, mut values: Vec<f64>) -> Summary {
    values.sort_by(f64::total_cmp);
    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    Summary {
        page,
        metric,
        count,
        mean,
        p95: percentile(&values, 0.95),
    }
}

/// Nearest-rank percentile of sorted, non-empty `values`.
fn percentile(values: &[f64], q: f64) -> f64 {
    let rank = (q * values.len() as f64).ceil() as usize;
    values[rank.clamp(1, values.len()) - 1]
}

/// Write the finished report.
pub struct WriteReport {
    pub summaries: Vec<Summary>,
    pub runs: usize,
    pub out: PathBuf,
    pub format: Format,
}

pub struct ReportWriter;

#[derive(Serialize)]
struct JsonReport<'a> {
    generated_at: String,
    runs: usize,
    summaries: &'a [Summary],
}

#[async_trait]
impl CommandHandler<WriteReport> for ReportWriter {
    async fn handle(&self, request: WriteReport) -> Result<()> {
        let body = match request.format {
            Format::Json => {
                let report = JsonReport {
                    generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                    runs: request.runs,
                    summaries: &request.summaries,
                };
                let mut payload = serde_json::to_string_pretty(&report).context("serialize json")?;
                payload.push('\n');
                payload
            }
            Format::Csv => render_csv(&request.summaries),
        };
        if let Some(parent) = request.out.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        tokio::fs::write(&request.out, body)
            .await
            .with_context(|| format!("write {}", request.out.display()))?;
        Ok(())
    }
}

pub fn render_csv(summaries: &[Summary]) -> String {
    let mut out = String::from("page,metric,count,mean,p95\n");
    for row in summaries {
        let _ = writeln!(
            out,
            "{},{},{},{:.3},{:.3}",
            csv_field(&row.page),
            csv_field(&row.metric),
            row.count,
            row.mean,
            row.p95
        );
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use jobflow::context::Context;
    use jobflow::control::Control;
    use jobflow::stream::channel;

    use super::*;

    fn sample(page: &str, metric: &str, value: f64) -> Sample {
        Sample {
            page: page.into(),
            metric: metric.into(),
            value,
        }
    }

    #[test]
    fn nearest_rank_percentile() {
        let values: Vec<f64> = (1..=20).map(f64::from).collect();
        assert_eq!(percentile(&values, 0.95), 19.0);
        assert_eq!(percentile(&[7.0], 0.95), 7.0);
        assert_eq!(percentile(&[1.0, 2.0], 0.0), 1.0);
    }

    #[tokio::test]
    async fn summarize_groups_by_page_and_metric() {
        let control = Control::new();
        let ctx = Context::new("summary", control.token());
        let (mut tx, rx) = channel(&ctx, 8);
        for s in [
            sample("/b", "lcp_ms", 300.0),
            sample("/a", "lcp_ms", 100.0),
            sample("/a", "lcp_ms", 200.0),
            sample("/a", "cls", 0.5),
        ] {
            tx.send(s).await.expect("send");
        }
        drop(tx);

        let summaries = SummarizeHandler.handle(rx).await.expect("summarize");
        let keys: Vec<_> = summaries
            .iter()
            .map(|s| format!("{} {}", s.page, s.metric))
            .collect();
        assert_eq!(keys, vec!["/a cls", "/a lcp_ms", "/b lcp_ms"]);
        assert_eq!(summaries[1].count, 2);
        assert_eq!(summaries[1].mean, 150.0);
        assert_eq!(summaries[1].p95, 200.0);
    }

    #[test]
    fn csv_quotes_awkward_fields() {
        let rows = vec![Summary {
            page: "/search?q=a,b".into(),
            metric: "lcp_ms".into(),
            count: 3,
            mean: 1234.5,
            p95: 2000.0,
        }];
        assert_eq!(
            render_csv(&rows),
            "page,metric,count,mean,p95\n\"/search?q=a,b\",lcp_ms,3,1234.500,2000.000\n"
        );
    }

    #[tokio::test]
    async fn writer_creates_parent_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = temp.path().join("reports").join("ux.json");
        ReportWriter
            .handle(WriteReport {
                summaries: vec![],
                runs: 0,
                out: out.clone(),
                format: Format::Json,
            })
            .await
            .expect("write");
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).expect("read")).expect("json");
        assert_eq!(written["runs"], 0);
        assert!(written["generated_at"].as_str().is_some());
    }
}
