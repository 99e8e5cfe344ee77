use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use sparkbench::accuracy::{load_prompts, AccuracyClient, AccuracyConfig};
use sparkbench::baseline::save_json;
use sparkbench::telemetry::init_tracing;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "eval-accuracy",
    about = "Collect deterministic responses for an instruction-following evaluation"
)]
struct Args {
    /// Inference server base URL
    #[arg(long, env = "VLLM_BASE_URL", default_value = "http://localhost:8000")]
    base_url: String,

    /// Model name to evaluate
    #[arg(long, env = "MODEL")]
    model: String,

    /// JSONL prompts, one object per line with a `prompt` or `text` field
    #[arg(long)]
    prompts: PathBuf,

    /// Evaluate only the first N prompts
    #[arg(long)]
    num_samples: Option<usize>,

    /// Completion token budget per prompt
    #[arg(long, default_value_t = 2048)]
    max_tokens: u32,

    /// Where the prompt/response pairs are written
    #[arg(long, default_value = "ifeval_responses.json")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing("sparkbench=info");
    let args = Args::parse();

    let mut config = AccuracyConfig::new(args.model);
    config.max_tokens = args.max_tokens;
    let client = AccuracyClient::try_new(&args.base_url, config)?;

    client.health_check().await?;
    info!(base_url = %args.base_url, "connected to inference server");

    let prompts = load_prompts(&args.prompts, args.num_samples)?;
    info!(samples = prompts.len(), "loaded prompts");

    let responses = client.collect(&prompts, Utc::now()).await;
    save_json(&args.output, &responses)?;
    println!(
        "Collected {} responses ({} failed), saved to {}",
        responses.num_samples,
        responses.failed_samples,
        args.output.display()
    );

    if responses.num_samples > 0 && responses.failed_samples == responses.num_samples {
        error!("every generation failed");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
