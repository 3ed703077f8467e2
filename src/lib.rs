//! Load generator and latency/throughput aggregator for OpenAI-compatible
//! LLM serving endpoints.

pub mod arrival;
pub mod backend;
pub mod cli;
pub mod config;
pub mod console;
pub mod dataset;
pub mod error;
pub mod gpu;
pub mod metrics;
pub mod report;
pub mod request;
pub mod runner;
pub mod tokenizer;

pub use config::BenchmarkConfig;
pub use error::{BenchError, RequestError, Result};
pub use report::BenchmarkReport;
pub use runner::{run_benchmark, BenchmarkRun};
