use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use clap::Parser;
use serde::Deserialize;

use crate::config::{ArrivalProcess, Backend, DatasetKind, RequestRate};
use crate::error::Result;

/// Command-line flags. Every setting may also come from a JSON `--config-file`
/// using camelCase keys; flags given on the command line win.
#[derive(Parser, Debug, Deserialize, Default)]
#[command(
    name = "benchmark_serving",
    about = "Benchmark the online serving throughput of an OpenAI-compatible endpoint"
)]
#[serde(rename_all = "camelCase", default)]
pub struct Args {
    /// Server base URL, e.g. http://localhost:8000. Takes precedence over --host/--port
    #[arg(long)]
    pub base_url: Option<String>,
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    /// API path, e.g. /v1/completions or /v1/chat/completions
    #[arg(long)]
    pub endpoint: Option<String>,
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,
    #[arg(long)]
    pub model: Option<String>,
    /// Tokenizer name on the Hugging Face hub or path to a tokenizer.json (defaults to --model)
    #[arg(long)]
    pub tokenizer: Option<String>,
    #[arg(long, value_enum)]
    pub dataset_name: Option<DatasetKind>,
    #[arg(long)]
    pub dataset_path: Option<String>,
    #[arg(long)]
    pub num_prompts: Option<usize>,
    /// Requests per second, or `inf` to send every request at once
    #[arg(long)]
    pub request_rate: Option<RequestRate>,
    #[arg(long, value_enum)]
    pub request_distribution: Option<ArrivalProcess>,
    /// Maximum number of requests in flight
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Longest prompt + output (in tokens) kept when sampling the dataset
    #[arg(long)]
    pub max_token_length: Option<usize>,
    /// Override the expected output length of every request
    #[arg(long)]
    pub output_len: Option<usize>,
    #[arg(long)]
    pub random_input_len: Option<usize>,
    #[arg(long)]
    pub random_output_len: Option<usize>,
    #[arg(long)]
    pub random_range_ratio: Option<f64>,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Per-request timeout in seconds
    #[arg(long)]
    pub request_timeout: Option<f64>,
    #[arg(long)]
    pub skip_test_prompt: bool,
    /// Poll nvidia-smi while the benchmark runs
    #[arg(long)]
    pub collect_gpu_stats: bool,
    #[arg(long)]
    pub gpu_poll_interval_ms: Option<u64>,
    #[arg(long)]
    pub save_result: bool,
    #[arg(long)]
    pub result_dir: Option<String>,
    #[arg(long)]
    pub result_filename: Option<String>,
    /// Extra KEY=VALUE pairs recorded in the result file
    #[arg(long = "metadata", value_name = "KEY=VALUE")]
    pub metadata: Vec<String>,
    #[arg(long)]
    pub note: Option<String>,
    #[arg(long)]
    pub disable_progress: bool,
    #[arg(long)]
    pub verbose: bool,
    #[serde(skip)]
    #[arg(long)]
    pub config_file: Option<String>,
}

impl Args {
    /// Parses the process arguments and folds in the config file, if one was named.
    pub fn load() -> Result<Self> {
        let input_args = Args::parse();
        match input_args.config_file.clone() {
            Some(config_file) => {
                let file_config = Self::from_file(&config_file)?;
                Ok(merge_configs(file_config, input_args))
            }
            None => Ok(input_args),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

pub fn merge_configs(file_config: Args, cli_config: Args) -> Args {
    let mut metadata = file_config.metadata;
    metadata.extend(cli_config.metadata);
    Args {
        base_url: cli_config.base_url.or(file_config.base_url),
        host: cli_config.host.or(file_config.host),
        port: cli_config.port.or(file_config.port),
        endpoint: cli_config.endpoint.or(file_config.endpoint),
        backend: cli_config.backend.or(file_config.backend),
        model: cli_config.model.or(file_config.model),
        tokenizer: cli_config.tokenizer.or(file_config.tokenizer),
        dataset_name: cli_config.dataset_name.or(file_config.dataset_name),
        dataset_path: cli_config.dataset_path.or(file_config.dataset_path),
        num_prompts: cli_config.num_prompts.or(file_config.num_prompts),
        request_rate: cli_config.request_rate.or(file_config.request_rate),
        request_distribution: cli_config
            .request_distribution
            .or(file_config.request_distribution),
        batch_size: cli_config.batch_size.or(file_config.batch_size),
        max_token_length: cli_config.max_token_length.or(file_config.max_token_length),
        output_len: cli_config.output_len.or(file_config.output_len),
        random_input_len: cli_config.random_input_len.or(file_config.random_input_len),
        random_output_len: cli_config
            .random_output_len
            .or(file_config.random_output_len),
        random_range_ratio: cli_config
            .random_range_ratio
            .or(file_config.random_range_ratio),
        seed: cli_config.seed.or(file_config.seed),
        request_timeout: cli_config.request_timeout.or(file_config.request_timeout),
        skip_test_prompt: cli_config.skip_test_prompt || file_config.skip_test_prompt,
        collect_gpu_stats: cli_config.collect_gpu_stats || file_config.collect_gpu_stats,
        gpu_poll_interval_ms: cli_config
            .gpu_poll_interval_ms
            .or(file_config.gpu_poll_interval_ms),
        save_result: cli_config.save_result || file_config.save_result,
        result_dir: cli_config.result_dir.or(file_config.result_dir),
        result_filename: cli_config.result_filename.or(file_config.result_filename),
        metadata,
        note: cli_config.note.or(file_config.note),
        disable_progress: cli_config.disable_progress || file_config.disable_progress,
        verbose: cli_config.verbose || file_config.verbose,
        config_file: cli_config.config_file,
    }
}
