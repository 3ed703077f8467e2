use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;
use reqwest::Url;
use serde::{Deserialize, Serialize, Serializer};

use crate::cli::Args;
use crate::console;
use crate::error::{BenchError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    Modular,
    Vllm,
    TrtLlm,
}

impl Backend {
    pub fn default_endpoint(self) -> &'static str {
        match self {
            Backend::Modular | Backend::Vllm => "/v1/completions",
            Backend::TrtLlm => "/v2/models/ensemble/generate_stream",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Modular => "modular",
            Backend::Vllm => "vllm",
            Backend::TrtLlm => "trt-llm",
        })
    }
}

/// The body / event schema spoken to the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiFormat {
    Completions,
    ChatCompletions,
    TrtLlm,
}

impl ApiFormat {
    pub fn resolve(backend: Backend, endpoint: &str) -> Self {
        if backend == Backend::TrtLlm {
            ApiFormat::TrtLlm
        } else if endpoint.trim_end_matches('/').ends_with("chat/completions") {
            ApiFormat::ChatCompletions
        } else {
            ApiFormat::Completions
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RequestRate {
    Infinite,
    PerSecond(f64),
}

impl FromStr for RequestRate {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("inf") || s.eq_ignore_ascii_case("infinity") {
            return Ok(RequestRate::Infinite);
        }
        let rate: f64 = s
            .parse()
            .map_err(|_| format!("invalid request rate `{s}`, expected a number or `inf`"))?;
        RequestRate::try_from(rate)
    }
}

impl TryFrom<f64> for RequestRate {
    type Error = String;

    fn try_from(rate: f64) -> std::result::Result<Self, Self::Error> {
        if rate.is_infinite() && rate > 0.0 {
            Ok(RequestRate::Infinite)
        } else if rate.is_finite() && rate > 0.0 {
            Ok(RequestRate::PerSecond(rate))
        } else {
            Err(format!("request rate must be greater than 0, got {rate}"))
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RateRepr {
    Number(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for RequestRate {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        match RateRepr::deserialize(d)? {
            RateRepr::Number(n) => RequestRate::try_from(n),
            RateRepr::Text(s) => s.parse(),
        }
        .map_err(serde::de::Error::custom)
    }
}

impl Serialize for RequestRate {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            RequestRate::Infinite => s.serialize_str("inf"),
            RequestRate::PerSecond(r) => s.serialize_f64(*r),
        }
    }
}

impl fmt::Display for RequestRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestRate::Infinite => f.write_str("inf"),
            RequestRate::PerSecond(r) => write!(f, "{r}"),
        }
    }
}

/// How gaps between request arrivals are drawn when the rate is finite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArrivalProcess {
    Poisson,
    Fixed,
}

impl fmt::Display for ArrivalProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArrivalProcess::Poisson => "poisson",
            ArrivalProcess::Fixed => "fixed",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetKind {
    #[value(name = "sharegpt")]
    #[serde(rename = "sharegpt")]
    ShareGpt,
    Random,
    Jsonl,
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DatasetKind::ShareGpt => "sharegpt",
            DatasetKind::Random => "random",
            DatasetKind::Jsonl => "jsonl",
        })
    }
}

#[derive(Clone, Debug)]
pub enum DatasetSource {
    ShareGpt {
        path: PathBuf,
        max_token_length: usize,
        output_len: Option<usize>,
    },
    Jsonl {
        path: PathBuf,
        output_len: Option<usize>,
    },
    Random {
        input_len: usize,
        output_len: usize,
        range_ratio: f64,
    },
}

#[derive(Clone, Debug)]
pub struct BenchmarkConfig {
    pub api_url: Url,
    /// Bearer token sent with every request, read from `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    pub backend: Backend,
    pub api_format: ApiFormat,
    pub model: String,
    pub tokenizer: String,
    pub dataset: DatasetSource,
    pub num_prompts: usize,
    pub request_rate: RequestRate,
    pub arrival: ArrivalProcess,
    pub max_concurrency: Option<usize>,
    pub request_timeout: Duration,
    pub seed: u64,
    pub test_prompt: bool,
    pub gpu_poll_interval: Option<Duration>,
    pub save_result: bool,
    pub result_dir: Option<PathBuf>,
    pub result_filename: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub note: String,
    pub show_progress: bool,
    pub verbose: bool,
}

const API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 6.0 * 60.0 * 60.0;

fn resolved<T: fmt::Display>(name: &str, value: Option<T>, default: T) -> T {
    match value {
        Some(value) => {
            console::setting(name, &value);
            value
        }
        None => {
            console::defaulted(name, &default);
            default
        }
    }
}

fn positive(name: &str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(BenchError::config(format!("{name} must be greater than 0")));
    }
    Ok(value)
}

impl BenchmarkConfig {
    /// Validates merged arguments, echoing each resolved or defaulted setting.
    pub fn from_args(args: Args) -> Result<Self> {
        let model = match args.model {
            Some(model) => {
                console::setting("Model", &model);
                model
            }
            None => return Err(BenchError::config("Model must be specified")),
        };

        let backend = resolved("Backend", args.backend, Backend::Modular);
        let endpoint = resolved(
            "Endpoint",
            args.endpoint,
            backend.default_endpoint().to_string(),
        );
        let base_url = match args.base_url {
            Some(base_url) => {
                console::setting("Base URL", &base_url);
                base_url
            }
            None => {
                let host = resolved("Host", args.host, "localhost".to_string());
                let port = resolved("Port", args.port, 8000);
                format!("http://{host}:{port}")
            }
        };
        let raw_url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        let api_url = Url::parse(&raw_url)
            .map_err(|e| BenchError::config(format!("invalid API URL {raw_url}: {e}")))?;
        let api_format = ApiFormat::resolve(backend, &endpoint);

        let tokenizer = resolved("Tokenizer", args.tokenizer, model.clone());

        let num_prompts = positive(
            "Number of prompts",
            resolved("Number of prompts", args.num_prompts, 1000),
        )?;
        let request_rate = resolved("Request rate", args.request_rate, RequestRate::Infinite);
        let arrival = match request_rate {
            RequestRate::Infinite => ArrivalProcess::Poisson,
            RequestRate::PerSecond(_) => resolved(
                "Request distribution",
                args.request_distribution,
                ArrivalProcess::Poisson,
            ),
        };

        let max_concurrency = match args.batch_size {
            Some(n) => {
                console::setting("Batch size", n);
                Some(positive("Batch size", n)?)
            }
            None => None,
        };

        let output_len = match args.output_len {
            Some(n) => {
                console::setting("Output length", n);
                Some(positive("Output length", n)?)
            }
            None => None,
        };

        let dataset_kind = resolved("Dataset", args.dataset_name, DatasetKind::ShareGpt);
        let dataset = match dataset_kind {
            DatasetKind::ShareGpt => {
                let path = dataset_path(args.dataset_path, "sharegpt")?;
                let max_token_length = positive(
                    "Max token length",
                    resolved("Max token length", args.max_token_length, 2048),
                )?;
                DatasetSource::ShareGpt {
                    path,
                    max_token_length,
                    output_len,
                }
            }
            DatasetKind::Jsonl => DatasetSource::Jsonl {
                path: dataset_path(args.dataset_path, "jsonl")?,
                output_len,
            },
            DatasetKind::Random => {
                let input_len = positive(
                    "Random input length",
                    resolved("Random input length", args.random_input_len, 1024),
                )?;
                let random_output = positive(
                    "Random output length",
                    resolved("Random output length", args.random_output_len, 128),
                )?;
                let range_ratio = resolved("Random range ratio", args.random_range_ratio, 1.0);
                if !(range_ratio > 0.0 && range_ratio <= 1.0) {
                    return Err(BenchError::config(
                        "Random range ratio must be in (0, 1]",
                    ));
                }
                DatasetSource::Random {
                    input_len,
                    output_len: output_len.unwrap_or(random_output),
                    range_ratio,
                }
            }
        };

        let timeout_secs = resolved(
            "Request timeout (s)",
            args.request_timeout,
            DEFAULT_REQUEST_TIMEOUT_SECS,
        );
        if !(timeout_secs.is_finite() && timeout_secs > 0.0) {
            return Err(BenchError::config("Request timeout must be greater than 0"));
        }
        let request_timeout = Duration::try_from_secs_f64(timeout_secs)
            .map_err(|e| BenchError::config(format!("Request timeout {timeout_secs}s: {e}")))?;

        let seed = resolved("Seed", args.seed, 0);

        let gpu_poll_interval = if args.collect_gpu_stats {
            let ms = positive(
                "GPU poll interval (ms)",
                resolved("GPU poll interval (ms)", args.gpu_poll_interval_ms, 500) as usize,
            )?;
            Some(Duration::from_millis(ms as u64))
        } else {
            None
        };

        let metadata = parse_metadata(&args.metadata)?;

        Ok(Self {
            api_url,
            api_key: std::env::var(API_KEY_ENV).ok(),
            backend,
            api_format,
            model,
            tokenizer,
            dataset,
            num_prompts,
            request_rate,
            arrival,
            max_concurrency,
            request_timeout,
            seed,
            test_prompt: !args.skip_test_prompt,
            gpu_poll_interval,
            save_result: args.save_result,
            result_dir: args.result_dir.map(PathBuf::from),
            result_filename: args.result_filename,
            metadata,
            note: args.note.unwrap_or_default(),
            show_progress: !args.disable_progress,
            verbose: args.verbose,
        })
    }

    /// Last path segment of the model id, used in result file names.
    pub fn model_name(&self) -> &str {
        self.model.rsplit('/').next().unwrap_or(&self.model)
    }
}

fn dataset_path(path: Option<String>, dataset: &str) -> Result<PathBuf> {
    match path {
        Some(path) if !path.is_empty() => {
            console::setting("Dataset path", &path);
            Ok(PathBuf::from(path))
        }
        _ => Err(BenchError::config(format!(
            "--dataset-path is required for the {dataset} dataset"
        ))),
    }
}

pub fn parse_metadata(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut metadata = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            BenchError::config(format!("invalid metadata `{pair}`, expected KEY=VALUE"))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(BenchError::config(format!(
                "invalid metadata `{pair}`, key is empty"
            )));
        }
        metadata.insert(key.to_string(), value.trim().to_string());
    }
    Ok(metadata)
}
