use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::aggregate::{AggregateResult, FailureRecord};
use crate::config::BenchmarkConfig;
use crate::cost::CostFigure;
use crate::workload::WorkloadKind;

/// Per-workload section of the results document. Latencies are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkloadSummary {
    pub tokens_per_second: f64,
    pub total_tokens: u64,
    pub total_time_sec: f64,
    pub cost_per_million_tokens: CostFigure,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub latency_p50: f64,
    pub latency_p95: f64,
    pub latency_p99: f64,
    /// Listed in the console summary; the results document only carries counts.
    #[serde(skip)]
    pub failures: Vec<FailureRecord>,
}

impl WorkloadSummary {
    pub fn from_aggregate(
        kind: WorkloadKind,
        aggregate: &AggregateResult,
        cost_per_hour: f64,
    ) -> Self {
        let tokens_per_second = kind.tokens_per_second(aggregate);
        Self {
            tokens_per_second,
            total_tokens: kind.measured_tokens(aggregate),
            total_time_sec: aggregate.total_wall_time.as_secs_f64(),
            cost_per_million_tokens: CostFigure::from_throughput(tokens_per_second, cost_per_hour),
            successful_requests: aggregate.successful_count,
            failed_requests: aggregate.failed_count,
            latency_p50: aggregate.median_latency().as_secs_f64(),
            latency_p95: aggregate.p95_latency().as_secs_f64(),
            latency_p99: aggregate.p99_latency().as_secs_f64(),
            failures: aggregate.failures.clone(),
        }
    }
}

/// The results document written at the end of a benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkReport {
    pub model: String,
    pub base_url: String,
    #[serde(rename = "dgx_cost_per_hour")]
    pub cost_per_hour: f64,
    pub concurrency: usize,
    pub num_requests: usize,
    pub commit_sha: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub image_tag: String,
    pub prefill: WorkloadSummary,
    pub decode: WorkloadSummary,
}

impl BenchmarkReport {
    pub fn new(
        config: &BenchmarkConfig,
        prefill: &AggregateResult,
        decode: &AggregateResult,
    ) -> Self {
        Self {
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            cost_per_hour: config.cost_per_hour,
            concurrency: config.concurrency,
            num_requests: config.num_requests,
            commit_sha: config.metadata.commit_sha.clone(),
            git_ref: config.metadata.git_ref.clone(),
            image_tag: config.metadata.image_tag.clone(),
            prefill: WorkloadSummary::from_aggregate(
                WorkloadKind::Prefill,
                prefill,
                config.cost_per_hour,
            ),
            decode: WorkloadSummary::from_aggregate(
                WorkloadKind::Decode,
                decode,
                config.cost_per_hour,
            ),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize benchmark report")
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        fs::write(path, json)
            .with_context(|| format!("failed to write results to {}", path.display()))
    }

    /// Plain-text results block printed at the end of a run.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let rule = "=".repeat(60);
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "RESULTS");
        let _ = writeln!(out, "{}", rule);
        self.render_workload(&mut out, "Prefill (Input Tokens)", "input", &self.prefill);
        self.render_workload(&mut out, "Decode (Output Tokens)", "output", &self.decode);
        out
    }

    fn render_workload(
        &self,
        out: &mut String,
        title: &str,
        noun: &str,
        summary: &WorkloadSummary,
    ) {
        let _ = writeln!(out, "\n### {}", title);
        let _ = writeln!(
            out,
            "  Successful requests: {}/{}",
            summary.successful_requests, self.num_requests
        );
        if summary.failed_requests > 0 {
            let _ = writeln!(out, "  Failed requests: {}", summary.failed_requests);
        }
        let _ = writeln!(out, "  Total {} tokens: {}", noun, summary.total_tokens);
        let _ = writeln!(out, "  Wall time: {:.2}s", summary.total_time_sec);
        let _ = writeln!(out, "  Throughput: {:.2} tokens/sec", summary.tokens_per_second);
        let _ = writeln!(out, "  Cost per 1M tokens: {}", summary.cost_per_million_tokens);
        let _ = writeln!(out, "  Latency P50/P95/P99: {}", format_latencies(summary));

        if !summary.failures.is_empty() {
            let _ = writeln!(out, "  Failures: {}", summary.failures.len());
            for failure in &summary.failures {
                let _ = writeln!(out, "    request {}: {}", failure.request_id, failure.error);
            }
        }
    }

    /// Markdown section for a CI job summary.
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## vLLM Benchmark Results (Concurrent)\n");
        let _ = writeln!(out, "- Model: `{}`", self.model);
        let _ = writeln!(out, "- Base URL: `{}`", self.base_url);
        let _ = writeln!(out, "- Image: `{}`", self.image_tag);
        let _ = writeln!(out, "- Commit: `{}` (`{}`)", self.commit_sha, self.git_ref);
        let _ = writeln!(out, "- DGX Spark cost: `${}/hour`", self.cost_per_hour);
        let _ = writeln!(
            out,
            "- Concurrency: `{}` | Requests: `{}`\n",
            self.concurrency, self.num_requests
        );
        for (title, summary) in [
            ("Prefill (input tokens)", &self.prefill),
            ("Decode (output tokens)", &self.decode),
        ] {
            let _ = writeln!(out, "### {}", title);
            let _ = writeln!(out, "- Throughput: **{:.2} tok/s**", summary.tokens_per_second);
            let _ = writeln!(out, "- Cost per 1M tokens: **{}**", summary.cost_per_million_tokens);
            let _ = writeln!(out, "- Latency P50/P95/P99: {}\n", format_latencies(summary));
        }
        out
    }

    pub fn append_step_summary(&self, path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open step summary {}", path.display()))?;
        file.write_all(self.render_markdown().as_bytes())
            .with_context(|| format!("failed to append step summary {}", path.display()))
    }
}

fn format_latencies(summary: &WorkloadSummary) -> String {
    format!(
        "{} / {} / {}",
        format_latency(summary.latency_p50),
        format_latency(summary.latency_p95),
        format_latency(summary.latency_p99)
    )
}

fn format_latency(seconds: f64) -> String {
    format!("{:.2}s", seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunMetadata;
    use crate::dispatch::RequestOutcome;
    use serde_json::json;
    use std::time::Duration;

    /// Successful requests split `prompt`/`completion` evenly, plus one failure.
    fn aggregate(
        prompt: u64,
        completion: u64,
        wall_secs: u64,
        latencies: &[u64],
    ) -> AggregateResult {
        let mut aggregate = AggregateResult::default();
        let count = latencies.len().max(1) as u64;
        for (id, latency) in latencies.iter().enumerate() {
            aggregate.record(RequestOutcome::succeeded(
                id + 1,
                prompt / count,
                completion / count,
                Duration::from_secs(*latency),
                1,
            ));
        }
        aggregate.record(RequestOutcome::failed(99, "HTTP 400: bad", 1));
        aggregate.finish(Duration::from_secs(wall_secs));
        aggregate
    }

    fn config() -> BenchmarkConfig {
        BenchmarkConfig::try_new(
            "http://spark:8000",
            "meta-llama/Llama-3.1-8B-Instruct",
            2,
            3,
            64,
            0.36,
        )
        .unwrap()
        .with_metadata(RunMetadata {
            commit_sha: "abc123".to_string(),
            git_ref: "main".to_string(),
            image_tag: "vllm:0.2.0".to_string(),
        })
    }

    fn sample_report() -> BenchmarkReport {
        let prefill = aggregate(2000, 2, 4, &[1, 2]);
        let decode = aggregate(0, 0, 0, &[]);
        BenchmarkReport::new(&config(), &prefill, &decode)
    }

    #[test]
    fn report_json_has_fixed_keys() {
        let report = sample_report();
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["model"], json!("meta-llama/Llama-3.1-8B-Instruct"));
        assert_eq!(value["base_url"], json!("http://spark:8000"));
        assert_eq!(value["dgx_cost_per_hour"], json!(0.36));
        assert_eq!(value["ref"], json!("main"));
        assert_eq!(value["prefill"]["tokens_per_second"], json!(500.0));
        assert_eq!(value["prefill"]["total_tokens"], json!(2000));
        assert_eq!(value["prefill"]["total_time_sec"], json!(4.0));
        assert_eq!(value["prefill"]["cost_per_million_tokens"], json!(0.2));
        assert_eq!(value["prefill"]["successful_requests"], json!(2));
        assert_eq!(value["prefill"]["failed_requests"], json!(1));
        assert_eq!(value["prefill"]["latency_p50"], json!(1.5));
        assert_eq!(value["prefill"]["latency_p95"], json!(2.0));
        assert_eq!(value["decode"]["tokens_per_second"], json!(0.0));
        assert_eq!(value["decode"]["cost_per_million_tokens"], json!(null));
        assert!(value["prefill"].get("failures").is_none());
    }

    #[test]
    fn summary_lists_failed_requests() {
        let report = sample_report();
        assert_eq!(report.prefill.failures.len(), 1);

        let text = report.render_summary();
        assert_eq!(text.matches("  Failures: 1").count(), 2);
        assert!(text.contains("    request 99: HTTP 400: bad"));
    }

    #[test]
    fn summary_mentions_both_workloads() {
        let report = sample_report();
        let text = report.render_summary();
        assert!(text.contains("### Prefill (Input Tokens)"));
        assert!(text.contains("Successful requests: 2/3"));
        assert!(text.contains("Throughput: 500.00 tokens/sec"));
        assert!(text.contains("Cost per 1M tokens: $0.2000"));
        assert!(text.contains("Latency P50/P95/P99: 1.50s / 2.00s / 2.00s"));
        assert!(text.contains("Cost per 1M tokens: n/a (no throughput)"));

        let markdown = report.render_markdown();
        assert!(markdown.contains("- Commit: `abc123` (`main`)"));
        assert!(markdown.contains("- Throughput: **500.00 tok/s**"));
    }

    #[test]
    fn step_summary_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.md");
        fs::write(&path, "# existing\n").unwrap();

        let report = sample_report();
        report.append_step_summary(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("# existing\n## vLLM Benchmark Results"));
    }
}
