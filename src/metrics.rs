//! Aggregation of per-request timing samples into the benchmark summary.
//!
//! Percentiles use linear interpolation between the two closest ranks:
//! `rank = p / 100 * (n - 1)`. Empty inputs aggregate to 0.

use std::time::Duration;

use serde::Serialize;

use crate::error::Result;
use crate::request::RequestOutcome;
use crate::tokenizer::TokenCodec;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// `sorted` must be in ascending order.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub mean_ms: f64,
    pub median_ms: f64,
    pub std_ms: f64,
    pub p99_ms: f64,
}

impl LatencyStats {
    pub fn from_ms(values: &[f64]) -> Self {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        Self {
            mean_ms: mean(&sorted),
            median_ms: percentile(&sorted, 50.0),
            std_ms: std_dev(&sorted),
            p99_ms: percentile(&sorted, 99.0),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkMetrics {
    pub completed: usize,
    pub failed: usize,
    pub duration_s: f64,
    pub total_input_tokens: usize,
    pub total_output_tokens: usize,
    pub request_throughput: f64,
    pub input_throughput: f64,
    pub output_throughput: f64,
    pub ttft: LatencyStats,
    pub tpot: LatencyStats,
    pub itl: LatencyStats,
}

/// Per-request columns kept for the result file, in completion order. `ids`
/// maps each row back to its position in the sampled dataset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestDetails {
    pub ids: Vec<usize>,
    /// Seconds after benchmark start at which each request was sent.
    pub issued_at: Vec<f64>,
    pub input_lens: Vec<usize>,
    pub output_lens: Vec<usize>,
    pub ttfts: Vec<f64>,
    pub itls: Vec<Vec<f64>>,
    pub generated_texts: Vec<String>,
    pub errors: Vec<String>,
}

fn to_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Consumes every outcome of a run. Failed requests only count toward `failed`
/// and the error list; all latency figures come from completed requests.
pub fn calculate_metrics(
    outcomes: Vec<RequestOutcome>,
    duration: Duration,
    codec: &dyn TokenCodec,
) -> Result<(BenchmarkMetrics, RequestDetails)> {
    let mut details = RequestDetails::default();
    let mut ttfts = Vec::new();
    let mut tpots = Vec::new();
    let mut itls = Vec::new();
    let mut completed = 0;
    let mut failed = 0;
    let mut total_input_tokens = 0;
    let mut total_output_tokens = 0;

    for outcome in outcomes {
        match outcome {
            RequestOutcome::Completed(done) => {
                let output_len = codec.count(&done.generated_text)?;
                let sample = done.sample;
                let ttft = sample.ttft();
                if output_len > 1 {
                    let decode = sample.latency().saturating_sub(ttft);
                    tpots.push(to_ms(decode) / (output_len - 1) as f64);
                }
                let request_itls: Vec<f64> = sample.itls().map(to_ms).collect();
                itls.extend_from_slice(&request_itls);
                ttfts.push(to_ms(ttft));

                completed += 1;
                total_input_tokens += done.record.prompt_len;
                total_output_tokens += output_len;

                details.ids.push(done.record.id);
                details.issued_at.push(done.issued_at.as_secs_f64());
                details.input_lens.push(done.record.prompt_len);
                details.output_lens.push(output_len);
                details.ttfts.push(to_ms(ttft));
                details.itls.push(request_itls);
                details.generated_texts.push(done.generated_text);
                details.errors.push(String::new());
            }
            RequestOutcome::Failed(failure) => {
                failed += 1;
                details.ids.push(failure.record.id);
                details.issued_at.push(failure.issued_at.as_secs_f64());
                details.input_lens.push(failure.record.prompt_len);
                details.output_lens.push(0);
                details.ttfts.push(0.0);
                details.itls.push(Vec::new());
                details.generated_texts.push(String::new());
                details.errors.push(failure.error.to_string());
            }
        }
    }

    let duration_s = duration.as_secs_f64();
    let per_second = |count: usize| {
        if duration_s > 0.0 {
            count as f64 / duration_s
        } else {
            0.0
        }
    };

    let metrics = BenchmarkMetrics {
        completed,
        failed,
        duration_s,
        total_input_tokens,
        total_output_tokens,
        request_throughput: per_second(completed),
        input_throughput: per_second(total_input_tokens),
        output_throughput: per_second(total_output_tokens),
        ttft: LatencyStats::from_ms(&ttfts),
        tpot: LatencyStats::from_ms(&tpots),
        itl: LatencyStats::from_ms(&itls),
    };
    Ok((metrics, details))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestError;
    use crate::request::{CompletedRequest, FailedRequest, RequestRecord, TimingSample};
    use crate::tokenizer::testing::WordCodec;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn record(id: usize, prompt_len: usize) -> RequestRecord {
        RequestRecord {
            id,
            prompt: String::new(),
            prompt_len,
            output_len: 4,
        }
    }

    fn completed(id: usize, arrivals: &[u64], latency: u64, text: &str) -> RequestOutcome {
        RequestOutcome::Completed(CompletedRequest {
            record: record(id, 10),
            issued_at: Duration::ZERO,
            sample: TimingSample::new(arrivals.iter().map(|&v| ms(v)).collect(), ms(latency))
                .unwrap(),
            generated_text: text.to_string(),
        })
    }

    fn failed(id: usize) -> RequestOutcome {
        RequestOutcome::Failed(FailedRequest {
            record: record(id, 10),
            issued_at: Duration::ZERO,
            error: RequestError::Timeout(ms(5)),
        })
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn reference_values_for_four_samples() {
        let stats = LatencyStats::from_ms(&[40.0, 10.0, 30.0, 20.0]);
        assert!(close(stats.mean_ms, 25.0));
        assert!(close(stats.median_ms, 25.0));
        assert!(close(stats.p99_ms, 39.7));
        assert!(close(stats.std_ms, 125.0_f64.sqrt()));
    }

    #[test]
    fn percentile_edges() {
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile(&[7.0], 99.0), 7.0);
        assert_eq!(percentile(&[1.0, 2.0, 3.0], 0.0), 1.0);
        assert_eq!(percentile(&[1.0, 2.0, 3.0], 100.0), 3.0);
        assert_eq!(percentile(&[1.0, 2.0, 3.0], 50.0), 2.0);
    }

    #[test]
    fn p50_never_exceeds_p99() {
        let mut values: Vec<f64> = (0..257).map(|i| ((i * 7919) % 1000) as f64 / 3.0).collect();
        let stats = LatencyStats::from_ms(&values);
        assert!(stats.median_ms <= stats.p99_ms);
        values.sort_by(f64::total_cmp);
        let mut last = f64::MIN;
        for p in 0..=100 {
            let v = percentile(&values, p as f64);
            assert!(v >= last);
            last = v;
        }
    }

    #[test]
    fn failed_requests_are_counted_but_not_timed() {
        let outcomes = vec![
            completed(0, &[100, 120, 140], 140, "t1 t2 t3"),
            failed(1),
            completed(2, &[200, 260], 260, "t1 t2"),
        ];
        let (m, details) = calculate_metrics(outcomes, Duration::from_secs(2), &WordCodec::new())
            .unwrap();
        assert_eq!(m.completed, 2);
        assert_eq!(m.failed, 1);
        assert_eq!(m.total_input_tokens, 20);
        assert_eq!(m.total_output_tokens, 5);
        assert!(close(m.request_throughput, 1.0));
        assert!(close(m.input_throughput, 10.0));
        assert!(close(m.output_throughput, 2.5));

        assert!(close(m.ttft.mean_ms, 150.0));
        // ITLs: 20, 20, 60
        assert!(close(m.itl.median_ms, 20.0));
        assert!(close(m.itl.mean_ms, 100.0 / 3.0));
        // TPOT: (140-100)/2 = 20, (260-200)/1 = 60
        assert!(close(m.tpot.mean_ms, 40.0));

        assert_eq!(details.errors.len(), 3);
        assert!(details.errors[1].contains("timed out"));
        assert_eq!(details.output_lens, vec![3, 0, 2]);
        assert_eq!(details.ids, vec![0, 1, 2]);
    }

    #[test]
    fn single_token_outputs_have_no_tpot() {
        let outcomes = vec![completed(0, &[50], 50, "t1")];
        let (m, _) = calculate_metrics(outcomes, Duration::from_secs(1), &WordCodec::new()).unwrap();
        assert_eq!(m.tpot, LatencyStats::default());
        assert!(close(m.ttft.p99_ms, 50.0));
    }

    #[test]
    fn all_failures_give_zeroed_latencies() {
        let outcomes = vec![failed(0), failed(1)];
        let (m, _) = calculate_metrics(outcomes, Duration::from_secs(1), &WordCodec::new()).unwrap();
        assert_eq!(m.completed + m.failed, 2);
        assert_eq!(m.request_throughput, 0.0);
        assert_eq!(m.ttft, LatencyStats::default());
    }
}
