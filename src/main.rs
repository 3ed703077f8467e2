use rand::rngs::StdRng;
use rand::SeedableRng;
use serving_benchmark::cli::Args;
use serving_benchmark::gpu::NvidiaSmi;
use serving_benchmark::tokenizer::HfTokenizer;
use serving_benchmark::{console, dataset, run_benchmark, BenchError, BenchmarkConfig, BenchmarkReport};

async fn run() -> Result<(), BenchError> {
    let args = Args::load()?;
    let config = BenchmarkConfig::from_args(args)?;

    // Hub downloads block, keep them off the runtime threads.
    let tokenizer_name = config.tokenizer.clone();
    let tokenizer = tokio::task::spawn_blocking(move || HfTokenizer::load(&tokenizer_name))
        .await
        .map_err(|e| BenchError::Tokenizer(format!("tokenizer loader panicked: {e}")))??;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let requests = dataset::load_requests(
        &config.dataset,
        config.num_prompts,
        &tokenizer,
        &mut rng,
        config.verbose,
    )?;
    console::rule();

    let gpu_probe = config.gpu_poll_interval.map(|_| NvidiaSmi);
    let run = run_benchmark(&config, requests, &mut rng, gpu_probe).await?;

    let report = BenchmarkReport::build(&config, run, &tokenizer)?;
    report.print_summary();

    if config.save_result {
        let path = report.save(&config)?;
        console::setting("Result file", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        console::error(err);
        std::process::exit(1);
    }
}
