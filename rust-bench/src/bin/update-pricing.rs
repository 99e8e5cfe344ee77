use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use sparkbench::baseline::load_json;
use sparkbench::pricing::{find_model_key, model_block, update_model_pricing, PricingUpdate};
use sparkbench::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[command(
    name = "update-pricing",
    about = "Write benchmark cost-per-million-token figures into the pricing page"
)]
struct Args {
    /// Benchmark results JSON
    #[arg(long, env = "BENCH_RESULTS_PATH", default_value = "bench_results.json")]
    results: PathBuf,

    /// Pricing page containing the `const MODELS = { ... };` block
    #[arg(long, env = "HTML_PATH", default_value = "docs/index.html")]
    html: PathBuf,

    /// Print the updated entry instead of writing the page
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    init_tracing("sparkbench=info");
    let args = Args::parse();

    let results = load_json(&args.results)?;
    let model = results
        .get("model")
        .and_then(|model| model.as_str())
        .unwrap_or_default()
        .to_string();
    let update = PricingUpdate::from_results(&results)?;

    println!("Loaded benchmark results from: {}", args.results.display());
    println!("  Model: {}", model);
    println!("  Input price (per 1M tokens):  ${:.2}", update.input_price);
    if let Some(cached) = update.cached_input_price {
        println!("  Cached input price (per 1M tokens): ${:.2}", cached);
    }
    println!("  Output price (per 1M tokens): ${:.2}", update.output_price);

    let html = fs::read_to_string(&args.html)
        .with_context(|| format!("HTML file not found: {}", args.html.display()))?;

    let model_key = find_model_key(&model, &html).ok_or_else(|| {
        anyhow!(
            "could not find a MODELS entry for backend name {:?} in {}",
            model,
            args.html.display()
        )
    })?;
    println!("  Matched model key: {}", model_key);

    let updated = update_model_pricing(&html, &model_key, &update)
        .ok_or_else(|| anyhow!("model entry {:?} disappeared from the page", model_key))?;

    if updated == html {
        println!("No changes made (pricing already up to date)");
        return Ok(());
    }

    if args.dry_run {
        println!("\n=== Dry run - changes that would be made ===");
        if let Some(block) = model_block(&updated, &model_key) {
            println!("{}", block);
        }
        return Ok(());
    }

    fs::write(&args.html, &updated)
        .with_context(|| format!("failed to write {}", args.html.display()))?;
    println!(
        "\nUpdated {} with new pricing for model '{}'",
        args.html.display(),
        model_key
    );

    Ok(())
}
