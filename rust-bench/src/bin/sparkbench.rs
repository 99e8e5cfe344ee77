use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sparkbench::telemetry::init_tracing;
use sparkbench::{run_benchmark, BenchmarkConfig, RetryPolicy, RunMetadata};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "sparkbench",
    about = "Prefill/decode throughput and cost benchmark for an OpenAI-compatible server"
)]
struct Args {
    /// Server base URL (e.g. http://spark-01:8000)
    #[arg(long, env = "BENCH_BASE_URL")]
    base_url: String,

    /// Model identifier sent in each request body
    #[arg(long, env = "BENCH_MODEL", default_value = "meta-llama/Llama-3.1-8B-Instruct")]
    model: String,

    /// Requests in flight per chunk
    #[arg(long, env = "CONCURRENCY", default_value_t = 32)]
    concurrency: usize,

    /// Requests sent per workload
    #[arg(long, env = "NUM_REQUESTS", default_value_t = 64)]
    num_requests: usize,

    /// Completion token budget for the decode workload
    #[arg(long, env = "MAX_NEW_TOKENS", default_value_t = 128)]
    max_new_tokens: u32,

    /// Hourly infrastructure cost in dollars
    #[arg(long, env = "DGX_COST_PER_HOUR", default_value_t = 0.16)]
    cost_per_hour: f64,

    /// Attempts per request, including the first
    #[arg(long, default_value_t = 3)]
    max_attempts: usize,

    /// Backoff before each retry, in seconds
    #[arg(long, value_delimiter = ',', default_values_t = [2u64, 4, 8])]
    retry_delays_secs: Vec<u64>,

    /// Per-request timeout for the prefill workload (default 120)
    #[arg(long, env = "PREFILL_TIMEOUT_SECS")]
    prefill_timeout_secs: Option<u64>,

    /// Per-request timeout for the decode workload (default 300)
    #[arg(long, env = "DECODE_TIMEOUT_SECS")]
    decode_timeout_secs: Option<u64>,

    /// Where the results JSON is written
    #[arg(long, env = "BENCH_RESULTS_PATH", default_value = "bench_results.json")]
    output: PathBuf,

    /// Markdown job summary to append to, if any
    #[arg(long, env = "GITHUB_STEP_SUMMARY")]
    step_summary: Option<PathBuf>,

    #[arg(long, env = "GITHUB_SHA", default_value = "")]
    commit_sha: String,

    #[arg(long = "ref", env = "GITHUB_REF_NAME", default_value = "")]
    git_ref: String,

    #[arg(long, env = "BENCH_IMAGE_TAG", default_value = "")]
    image_tag: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("sparkbench=info");
    let args = Args::parse();

    let retry = RetryPolicy::try_new(
        args.max_attempts,
        args.retry_delays_secs
            .iter()
            .map(|secs| Duration::from_secs(*secs))
            .collect(),
    )?;

    let config = BenchmarkConfig::try_new(
        &args.base_url,
        args.model,
        args.concurrency,
        args.num_requests,
        args.max_new_tokens,
        args.cost_per_hour,
    )?
    .with_retry(retry)
    .with_timeouts(
        args.prefill_timeout_secs.map(Duration::from_secs),
        args.decode_timeout_secs.map(Duration::from_secs),
    )
    .with_metadata(RunMetadata {
        commit_sha: args.commit_sha,
        git_ref: args.git_ref,
        image_tag: args.image_tag,
    });

    print_header(&config);

    let report = run_benchmark(&config).await?;

    println!("\n{}", report.render_summary());
    println!("=== Benchmark summary (JSON) ===");
    println!("{}", report.to_json()?);

    report.write_json(&args.output)?;
    info!(path = %args.output.display(), "results saved");

    if let Some(path) = &args.step_summary {
        report
            .append_step_summary(path)
            .with_context(|| format!("failed to write job summary {}", path.display()))?;
    }

    Ok(())
}

fn print_header(config: &BenchmarkConfig) {
    let rule = "=".repeat(60);
    println!("{}", rule);
    println!("vLLM Concurrent Benchmark");
    println!("{}", rule);
    println!("Model: {}", config.model);
    println!("Base URL: {}", config.base_url);
    println!("DGX Spark Cost: ${}/hour", config.cost_per_hour);
    println!("Concurrency: {}", config.concurrency);
    println!("Requests per benchmark: {}", config.num_requests);
    println!("Max new tokens (decode): {}", config.max_new_tokens);
    println!("{}", rule);
}
