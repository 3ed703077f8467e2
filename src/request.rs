use std::time::{Duration, Instant};

use crate::error::RequestError;

/// A prompt drawn from the dataset. Immutable once created.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestRecord {
    pub id: usize,
    pub prompt: String,
    pub prompt_len: usize,
    pub output_len: usize,
}

/// Token arrival offsets for one streamed response, measured from the moment
/// the request was sent. Always holds at least one arrival.
#[derive(Clone, Debug, PartialEq)]
pub struct TimingSample {
    arrivals: Vec<Duration>,
    latency: Duration,
}

impl TimingSample {
    /// Returns `None` when no token arrived, which callers treat as a failed request.
    pub fn new(arrivals: Vec<Duration>, latency: Duration) -> Option<Self> {
        if arrivals.is_empty() {
            return None;
        }
        Some(Self { arrivals, latency })
    }

    pub fn ttft(&self) -> Duration {
        self.arrivals[0]
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn arrivals(&self) -> &[Duration] {
        &self.arrivals
    }

    pub fn itls(&self) -> impl Iterator<Item = Duration> + '_ {
        self.arrivals.windows(2).map(|w| w[1].saturating_sub(w[0]))
    }
}

/// Records token arrivals against a fixed start instant.
pub struct StreamTimer {
    start: Instant,
    arrivals: Vec<Duration>,
}

impl StreamTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            arrivals: Vec::new(),
        }
    }

    pub fn mark(&mut self) {
        self.arrivals.push(self.start.elapsed());
    }

    pub fn finish(self) -> Option<TimingSample> {
        let latency = self.start.elapsed();
        TimingSample::new(self.arrivals, latency)
    }
}

#[derive(Debug)]
pub struct CompletedRequest {
    pub record: RequestRecord,
    /// Offset from benchmark start at which the request was sent.
    pub issued_at: Duration,
    pub sample: TimingSample,
    pub generated_text: String,
}

#[derive(Debug)]
pub struct FailedRequest {
    pub record: RequestRecord,
    pub issued_at: Duration,
    pub error: RequestError,
}

#[derive(Debug)]
pub enum RequestOutcome {
    Completed(CompletedRequest),
    Failed(FailedRequest),
}

impl RequestOutcome {
    pub fn record(&self) -> &RequestRecord {
        match self {
            RequestOutcome::Completed(c) => &c.record,
            RequestOutcome::Failed(f) => &f.record,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Completed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn empty_stream_yields_no_sample() {
        assert!(TimingSample::new(vec![], ms(10)).is_none());
        assert!(StreamTimer::start().finish().is_none());
    }

    #[test]
    fn ttft_and_itls_follow_arrivals() {
        let sample = TimingSample::new(vec![ms(100), ms(120), ms(150), ms(150)], ms(160)).unwrap();
        assert_eq!(sample.ttft(), ms(100));
        assert_eq!(sample.latency(), ms(160));
        let itls: Vec<Duration> = sample.itls().collect();
        assert_eq!(itls, vec![ms(20), ms(30), ms(0)]);
    }

    #[test]
    fn timer_arrivals_never_decrease() {
        let mut timer = StreamTimer::start();
        for _ in 0..5 {
            timer.mark();
        }
        let sample = timer.finish().unwrap();
        assert!(sample.arrivals().windows(2).all(|w| w[0] <= w[1]));
        assert!(sample.latency() >= *sample.arrivals().last().unwrap());
    }
}
