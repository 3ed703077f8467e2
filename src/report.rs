use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::PathBuf;

use chrono::{DateTime, Local};
use colored::Colorize;
use serde::Serialize;

use crate::config::{ArrivalProcess, Backend, BenchmarkConfig, RequestRate};
use crate::error::Result;
use crate::gpu::GpuSummary;
use crate::metrics::{calculate_metrics, BenchmarkMetrics, LatencyStats, RequestDetails};
use crate::runner::BenchmarkRun;
use crate::tokenizer::TokenCodec;

/// The result of one benchmark run. Built once, then only printed and written.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub date: String,
    pub backend: Backend,
    pub model_id: String,
    pub tokenizer_id: String,
    pub num_prompts: usize,
    pub request_rate: RequestRate,
    pub request_distribution: ArrivalProcess,
    pub max_concurrency: Option<usize>,
    #[serde(flatten)]
    pub metrics: BenchmarkMetrics,
    #[serde(flatten)]
    pub gpu: Option<GpuSummary>,
    #[serde(flatten)]
    pub details: RequestDetails,
    pub metadata: BTreeMap<String, String>,
    pub note: String,
    #[serde(skip)]
    created: DateTime<Local>,
}

impl BenchmarkReport {
    pub fn build(
        config: &BenchmarkConfig,
        run: BenchmarkRun,
        codec: &dyn TokenCodec,
    ) -> Result<Self> {
        let (metrics, details) = calculate_metrics(run.outcomes, run.duration, codec)?;
        let created = Local::now();
        Ok(Self {
            date: created.format("%Y%m%d-%H%M%S").to_string(),
            backend: config.backend,
            model_id: config.model.clone(),
            tokenizer_id: config.tokenizer.clone(),
            num_prompts: config.num_prompts,
            request_rate: config.request_rate,
            request_distribution: config.arrival,
            max_concurrency: config.max_concurrency,
            metrics,
            gpu: run.gpu,
            details,
            metadata: config.metadata.clone(),
            note: config.note.clone(),
            created,
        })
    }

    /// `{backend}-{request_rate}qps-{model_name}-{timestamp}.json`
    pub fn default_filename(&self, model_name: &str) -> String {
        format!(
            "{}-{}qps-{}-{}.json",
            self.backend,
            self.request_rate,
            model_name,
            self.created.format("%Y%m%d-%H%M%S")
        )
    }

    pub fn save(&self, config: &BenchmarkConfig) -> Result<PathBuf> {
        let filename = config
            .result_filename
            .clone()
            .unwrap_or_else(|| self.default_filename(config.model_name()));
        let path = match &config.result_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                dir.join(filename)
            }
            None => PathBuf::from(filename),
        };
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(path)
    }

    pub fn summary(&self) -> String {
        let m = &self.metrics;
        let mut out = String::new();
        out.push_str(&format!("{:=^50}\n", " Serving Benchmark Result "));
        row(&mut out, "Successful requests:", m.completed);
        row(&mut out, "Failed requests:", m.failed);
        row(&mut out, "Benchmark duration (s):", format!("{:.2}", m.duration_s));
        row(&mut out, "Total input tokens:", m.total_input_tokens);
        row(&mut out, "Total generated tokens:", m.total_output_tokens);
        row(&mut out, "Request throughput (req/s):", format!("{:.2}", m.request_throughput));
        row(&mut out, "Input token throughput (tok/s):", format!("{:.2}", m.input_throughput));
        row(&mut out, "Output token throughput (tok/s):", format!("{:.2}", m.output_throughput));
        latency_block(&mut out, "Time to First Token", "TTFT", &m.ttft);
        latency_block(&mut out, "Time per Output Token (excl. 1st token)", "TPOT", &m.tpot);
        latency_block(&mut out, "Inter-token Latency", "ITL", &m.itl);
        if let Some(gpu) = &self.gpu {
            out.push_str(&format!("{:-^50}\n", "GPU Stats"));
            row(&mut out, "GPU Utilization (%):", format!("{:.2}", gpu.gpu_utilization));
            row(&mut out, "Peak GPU Memory Used (MiB):", format!("{:.2}", gpu.peak_gpu_memory_mib));
            row(
                &mut out,
                "GPU Memory Available (MiB):",
                format!("{:.2}", gpu.available_gpu_memory_mib),
            );
        }
        out.push_str(&"=".repeat(50));
        out
    }

    pub fn print_summary(&self) {
        println!("{}", self.summary().bold());
    }
}

fn row(out: &mut String, label: &str, value: impl std::fmt::Display) {
    out.push_str(&format!("{:<40}{:<10}\n", label, value));
}

fn latency_block(out: &mut String, title: &str, short: &str, stats: &LatencyStats) {
    out.push_str(&format!("{:-^50}\n", title));
    row(out, &format!("Mean {short} (ms):"), format!("{:.2}", stats.mean_ms));
    row(out, &format!("Median {short} (ms):"), format!("{:.2}", stats.median_ms));
    row(out, &format!("P99 {short} (ms):"), format!("{:.2}", stats.p99_ms));
}
