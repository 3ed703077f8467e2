use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep_until;

use crate::arrival::arrival_offsets;
use crate::backend::ApiClient;
use crate::config::BenchmarkConfig;
use crate::console;
use crate::error::{BenchError, RequestError, Result};
use crate::gpu::{GpuProbe, GpuSampler, GpuSummary};
use crate::request::{CompletedRequest, FailedRequest, RequestOutcome, RequestRecord};

/// Everything a finished run produced, before aggregation.
#[derive(Debug)]
pub struct BenchmarkRun {
    pub outcomes: Vec<RequestOutcome>,
    pub duration: Duration,
    pub gpu: Option<GpuSummary>,
}

/// Sends every request on its arrival schedule and collects one outcome per request.
///
/// Requests wait for their scheduled offset, then for a concurrency permit when
/// `max_concurrency` is set. Outcomes flow through a channel to a single collector,
/// so the result list is only ever appended to from one place.
pub async fn run_benchmark<R, P>(
    config: &BenchmarkConfig,
    requests: Vec<RequestRecord>,
    rng: &mut R,
    gpu_probe: Option<P>,
) -> Result<BenchmarkRun>
where
    R: Rng + ?Sized,
    P: GpuProbe,
{
    let client = ApiClient::new(config)?;
    let offsets = arrival_offsets(requests.len(), config.request_rate, config.arrival, rng)?;

    if config.test_prompt {
        let first = requests
            .first()
            .ok_or_else(|| BenchError::dataset("no requests to send"))?;
        console::info("Starting initial single prompt test run...");
        client.stream(first).await.map_err(BenchError::TestPrompt)?;
        console::info("Initial test run completed. Starting main benchmark run...");
    }

    console::setting("Traffic request rate", config.request_rate);
    if let Some(n) = config.max_concurrency {
        console::setting("Maximum request concurrency", n);
    }

    let gpu_sampler = match (gpu_probe, config.gpu_poll_interval) {
        (Some(probe), Some(interval)) => Some(GpuSampler::start(probe, interval)),
        _ => None,
    };

    let progress = progress_bar(requests.len() as u64, config.show_progress);
    let semaphore = config.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sent = requests.clone();
    let start = Instant::now();

    for (record, offset) in requests.into_iter().zip(offsets) {
        let client = client.clone();
        let semaphore = semaphore.clone();
        let tx = tx.clone();
        let verbose = config.verbose;
        tokio::spawn(async move {
            sleep_until((start + offset).into()).await;
            let _permit = match semaphore {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            let issued_at = start.elapsed();
            let outcome = match client.stream(&record).await {
                Ok(response) => RequestOutcome::Completed(CompletedRequest {
                    record,
                    issued_at,
                    sample: response.sample,
                    generated_text: response.generated_text,
                }),
                Err(error) => RequestOutcome::Failed(FailedRequest {
                    record,
                    issued_at,
                    error,
                }),
            };
            if verbose {
                report_request(&outcome, offset);
            }
            let _ = tx.send(outcome);
        });
    }
    drop(tx);

    let mut outcomes = Vec::new();
    while let Some(outcome) = rx.recv().await {
        progress.inc(1);
        outcomes.push(outcome);
    }
    let duration = start.elapsed();
    progress.finish_and_clear();
    account_for_lost(&mut outcomes, sent);

    let gpu = match gpu_sampler {
        Some(sampler) => sampler.finish().await,
        None => None,
    };

    Ok(BenchmarkRun {
        outcomes,
        duration,
        gpu,
    })
}

/// A task that panics drops its sender without reporting. Every request that
/// never produced an outcome is recorded as failed so the totals still add up.
fn account_for_lost(outcomes: &mut Vec<RequestOutcome>, sent: Vec<RequestRecord>) {
    if outcomes.len() >= sent.len() {
        return;
    }
    let seen: HashSet<usize> = outcomes.iter().map(|o| o.record().id).collect();
    let lost: Vec<RequestRecord> = sent.into_iter().filter(|r| !seen.contains(&r.id)).collect();
    console::warning(format!(
        "{} requests ended without a result, counting them as failed",
        lost.len()
    ));
    outcomes.extend(lost.into_iter().map(|record| {
        RequestOutcome::Failed(FailedRequest {
            record,
            issued_at: Duration::ZERO,
            error: RequestError::Lost,
        })
    }));
}

fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    if let Ok(style) =
        ProgressStyle::with_template("{elapsed_precise} [{bar:40.cyan/blue}] {pos}/{len} requests")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

fn report_request(outcome: &RequestOutcome, delay: Duration) {
    let record = outcome.record();
    match outcome {
        RequestOutcome::Completed(done) => println!(
            "{}{:>5}: <<{}>> has Delay: {}s, TTFT: {}s, Latency: {}s, Prompt Len: {}, Decode Len: {}",
            "Request".cyan().bold(),
            record.id.to_string().purple().bold(),
            console::abbreviate(&done.generated_text),
            format!("{:.2}", delay.as_secs_f64()).green().bold(),
            format!("{:.3}", done.sample.ttft().as_secs_f64()).green().bold(),
            format!("{:.2}", done.sample.latency().as_secs_f64()).green().bold(),
            record.prompt_len.to_string().green().bold(),
            record.output_len.to_string().green().bold()
        ),
        RequestOutcome::Failed(failure) => println!(
            "{}{:>5}: failed with {}",
            "Request".cyan().bold(),
            record.id.to_string().purple().bold(),
            failure.error.to_string().yellow().bold()
        ),
    }
}
