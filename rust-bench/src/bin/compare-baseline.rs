use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use serde_json::Value;
use sparkbench::baseline::{
    compare, default_ifeval_mappings, load_json, load_mappings, save_json,
    update_baseline, MetricMapping, DEFAULT_THRESHOLD,
};
use sparkbench::telemetry::init_tracing;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "compare-baseline",
    about = "Compare instruction-following accuracy against a stored baseline"
)]
struct Args {
    /// Results JSON (accuracy evaluation output or bench_results.json)
    #[arg(long)]
    results: PathBuf,

    /// Baseline JSON
    #[arg(long)]
    baseline: PathBuf,

    /// JSON array of {result_key, baseline_key, name, threshold} overriding the built-in table
    #[arg(long)]
    mapping: Option<PathBuf>,

    /// Allowed drop in percentage points before a metric fails
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    threshold: f64,

    /// Overwrite the baseline with this run's values instead of comparing
    #[arg(long)]
    update_baseline: bool,

    /// Run identifier stored in the baseline on update
    #[arg(long)]
    run_id: Option<String>,

    /// Where the comparison document is written
    #[arg(long, default_value = "comparison_results.json")]
    output: PathBuf,
}

fn main() -> Result<ExitCode> {
    init_tracing("sparkbench=info");
    let args = Args::parse();

    let mappings = match &args.mapping {
        Some(path) => load_mappings(path)?,
        None => default_ifeval_mappings(),
    };
    let results = load_json(&args.results)?;
    let mut baseline = load_json(&args.baseline)?;

    if args.update_baseline {
        update_baseline(
            &mut baseline,
            &results,
            &mappings,
            args.run_id.as_deref(),
            Utc::now(),
        )?;
        save_json(&args.baseline, &baseline)?;
        println!("✅ Baseline updated: {}", args.baseline.display());
        print_updated(&baseline, &mappings);
        return Ok(ExitCode::SUCCESS);
    }

    let comparison = compare(&results, &baseline, &mappings, args.threshold, Utc::now());
    save_json(&args.output, &comparison)?;
    info!(path = %args.output.display(), "comparison results saved");

    println!("\n{}\n", comparison.render());

    if comparison.failed() {
        println!("❌ Comparison FAILED: Model accuracy degraded beyond acceptable threshold");
        return Ok(ExitCode::FAILURE);
    }
    println!("✅ Comparison PASSED: Model accuracy within acceptable range");
    Ok(ExitCode::SUCCESS)
}

fn print_updated(baseline: &Value, mappings: &[MetricMapping]) {
    let ifeval = baseline
        .get("accuracy")
        .and_then(|accuracy| accuracy.get("ifeval"))
        .unwrap_or(&Value::Null);

    let rule = "=".repeat(60);
    println!("\n{}", rule);
    println!("Updated Baseline Values:");
    println!("{}", rule);
    println!(
        "Model: {}",
        baseline
            .get("model")
            .and_then(|model| model.as_str())
            .unwrap_or("unknown")
    );
    for mapping in mappings {
        let value = ifeval
            .get(&mapping.baseline_key)
            .and_then(|value| value.as_f64())
            .unwrap_or(0.0);
        println!("{}: {:.2}%", mapping.name, value);
    }
    println!(
        "Samples: {}",
        ifeval
            .get("num_samples")
            .and_then(|value| value.as_u64())
            .unwrap_or(0)
    );
    println!("{}\n", rule);
}
