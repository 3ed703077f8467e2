//! Background GPU utilization / memory sampling during a benchmark run.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::console;

/// `None` marks a field the driver reported as `[N/A]` or otherwise non-numeric.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuReading {
    pub index: u32,
    pub utilization_pct: Option<f64>,
    pub memory_used_mib: Option<f64>,
    pub memory_total_mib: Option<f64>,
}

/// A source of GPU readings. One call returns one reading per visible device.
pub trait GpuProbe: Send + Sync + 'static {
    fn sample(&self) -> impl Future<Output = Result<Vec<GpuReading>, String>> + Send;
}

/// Polls `nvidia-smi`.
pub struct NvidiaSmi;

const NVIDIA_SMI_QUERY: [&str; 2] = [
    "--query-gpu=index,utilization.gpu,memory.used,memory.total",
    "--format=csv,noheader,nounits",
];

impl GpuProbe for NvidiaSmi {
    fn sample(&self) -> impl Future<Output = Result<Vec<GpuReading>, String>> + Send {
        async {
            let output = Command::new("nvidia-smi")
                .args(NVIDIA_SMI_QUERY)
                .output()
                .await
                .map_err(|e| format!("failed to run nvidia-smi: {e}"))?;
            if !output.status.success() {
                return Err(format!(
                    "nvidia-smi exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ));
            }
            parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
        }
    }
}

/// Parses `index, utilization, memory.used, memory.total` CSV rows. Values that
/// are not numbers (MIG devices print `[N/A]` for utilization) become `None`.
pub fn parse_nvidia_smi(text: &str) -> Result<Vec<GpuReading>, String> {
    let mut readings = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 4 {
            return Err(format!("unexpected nvidia-smi row: {line}"));
        }
        let number = |s: &str| s.parse::<f64>().ok().filter(|v| v.is_finite());
        readings.push(GpuReading {
            index: fields[0]
                .parse()
                .map_err(|_| format!("unexpected GPU index in row: {line}"))?,
            utilization_pct: number(fields[1]),
            memory_used_mib: number(fields[2]),
            memory_total_mib: number(fields[3]),
        });
    }
    if readings.is_empty() {
        return Err("nvidia-smi reported no GPUs".to_string());
    }
    Ok(readings)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpuSummary {
    /// Mean across samples of the mean utilization across reporting devices.
    pub gpu_utilization: f64,
    /// Highest total memory in use across all devices at any sample.
    pub peak_gpu_memory_mib: f64,
    /// Free memory across all devices at the peak sample.
    pub available_gpu_memory_mib: f64,
    pub gpu_samples: usize,
}

#[derive(Debug, Default)]
pub struct GpuTrace {
    samples: Vec<Vec<GpuReading>>,
}

impl GpuTrace {
    pub fn push(&mut self, readings: Vec<GpuReading>) {
        if !readings.is_empty() {
            self.samples.push(readings);
        }
    }

    pub fn summary(&self) -> Option<GpuSummary> {
        if self.samples.is_empty() {
            return None;
        }
        let mut utilization = Vec::new();
        let mut peak_used = 0.0;
        let mut available_at_peak = 0.0;
        for sample in &self.samples {
            let known: Vec<f64> = sample.iter().filter_map(|r| r.utilization_pct).collect();
            if !known.is_empty() {
                utilization.push(known.iter().sum::<f64>() / known.len() as f64);
            }
            let (used, total) = sample
                .iter()
                .filter_map(|r| Some((r.memory_used_mib?, r.memory_total_mib?)))
                .fold((0.0, 0.0), |(u, t), (ru, rt)| (u + ru, t + rt));
            if used > peak_used {
                peak_used = used;
                available_at_peak = (total - used).max(0.0);
            }
        }
        let gpu_utilization = if utilization.is_empty() {
            0.0
        } else {
            utilization.iter().sum::<f64>() / utilization.len() as f64
        };
        Some(GpuSummary {
            gpu_utilization,
            peak_gpu_memory_mib: peak_used,
            available_gpu_memory_mib: available_at_peak,
            gpu_samples: self.samples.len(),
        })
    }
}

/// Polls a probe on a fixed interval until stopped. A probe error ends sampling
/// with a warning; whatever was collected so far is kept.
pub struct GpuSampler {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<GpuTrace>,
}

impl GpuSampler {
    pub fn start<P: GpuProbe>(probe: P, interval: Duration) -> Self {
        let (stop, mut stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut trace = GpuTrace::default();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => match probe.sample().await {
                        Ok(readings) => trace.push(readings),
                        Err(e) => {
                            console::warning(format!("GPU stats unavailable: {e}"));
                            break;
                        }
                    },
                }
            }
            trace
        });
        Self { stop, handle }
    }

    pub async fn finish(self) -> Option<GpuSummary> {
        let _ = self.stop.send(());
        match self.handle.await {
            Ok(trace) => trace.summary(),
            Err(e) => {
                console::warning(format!("GPU sampler task failed: {e}"));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn reading(index: u32, util: f64, used: f64, total: f64) -> GpuReading {
        GpuReading {
            index,
            utilization_pct: Some(util),
            memory_used_mib: Some(used),
            memory_total_mib: Some(total),
        }
    }

    #[test]
    fn parses_nvidia_smi_rows() {
        let readings = parse_nvidia_smi("0, 87, 70000, 81559\n1, 13, 1024, 81559\n").unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0], reading(0, 87.0, 70000.0, 81559.0));
        assert_eq!(readings[1].index, 1);
    }

    #[test]
    fn rejects_unexpected_output() {
        assert!(parse_nvidia_smi("").is_err());
        assert!(parse_nvidia_smi("0, 1, 2").is_err());
        assert!(parse_nvidia_smi("gpu0, 1, 2, 3").is_err());
    }

    #[test]
    fn unavailable_fields_are_skipped_not_fatal() {
        let readings = parse_nvidia_smi("0, [N/A], 2048, 81559
1, 40, [N/A], 81559
").unwrap();
        assert_eq!(readings[0].utilization_pct, None);
        assert_eq!(readings[0].memory_used_mib, Some(2048.0));
        assert_eq!(readings[1].utilization_pct, Some(40.0));
        assert_eq!(readings[1].memory_used_mib, None);

        let mut trace = GpuTrace::default();
        trace.push(readings);
        trace.push(parse_nvidia_smi("0, [N/A], 4096, 81559
1, 60, [N/A], 81559
").unwrap());
        let summary = trace.summary().unwrap();
        assert_eq!(summary.gpu_samples, 2);
        assert_eq!(summary.gpu_utilization, 50.0);
        assert_eq!(summary.peak_gpu_memory_mib, 4096.0);
        assert_eq!(summary.available_gpu_memory_mib, 81559.0 - 4096.0);
    }

    #[test]
    fn summary_tracks_mean_utilization_and_peak_memory() {
        let mut trace = GpuTrace::default();
        assert!(trace.summary().is_none());
        trace.push(vec![reading(0, 50.0, 1000.0, 8000.0), reading(1, 100.0, 3000.0, 8000.0)]);
        trace.push(vec![reading(0, 25.0, 6000.0, 8000.0), reading(1, 25.0, 6000.0, 8000.0)]);
        let summary = trace.summary().unwrap();
        assert_eq!(summary.gpu_utilization, 50.0);
        assert_eq!(summary.peak_gpu_memory_mib, 12000.0);
        assert_eq!(summary.available_gpu_memory_mib, 4000.0);
        assert_eq!(summary.gpu_samples, 2);
    }

    struct CountingProbe {
        calls: Arc<AtomicUsize>,
        fail_after: usize,
    }

    impl GpuProbe for CountingProbe {
        fn sample(&self) -> impl Future<Output = Result<Vec<GpuReading>, String>> + Send {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let fail_after = self.fail_after;
            async move {
                if n >= fail_after {
                    Err("probe exhausted".to_string())
                } else {
                    Ok(vec![reading(0, 10.0 * (n + 1) as f64, 100.0, 1000.0)])
                }
            }
        }
    }

    #[tokio::test]
    async fn sampler_collects_until_probe_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sampler = GpuSampler::start(
            CountingProbe {
                calls: Arc::clone(&calls),
                fail_after: 3,
            },
            Duration::from_millis(1),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        let summary = sampler.finish().await.unwrap();
        assert_eq!(summary.gpu_samples, 3);
        assert_eq!(summary.gpu_utilization, 20.0);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn sampler_without_readings_reports_nothing() {
        let sampler = GpuSampler::start(
            CountingProbe {
                calls: Arc::new(AtomicUsize::new(0)),
                fail_after: 0,
            },
            Duration::from_millis(1),
        );
        assert!(sampler.finish().await.is_none());
    }
}
