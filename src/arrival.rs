use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, Exp};

use crate::config::{ArrivalProcess, RequestRate};
use crate::error::{BenchError, Result};

/// Send offsets (relative to benchmark start) for `num_requests` requests.
/// The first request always goes out at zero.
pub fn arrival_offsets<R: Rng + ?Sized>(
    num_requests: usize,
    rate: RequestRate,
    process: ArrivalProcess,
    rng: &mut R,
) -> Result<Vec<Duration>> {
    let offsets = match rate {
        RequestRate::Infinite => vec![0.0; num_requests],
        RequestRate::PerSecond(rate) => match process {
            ArrivalProcess::Poisson => poisson_offsets(rate, num_requests, rng)?,
            ArrivalProcess::Fixed => fixed_offsets(rate, num_requests),
        },
    };
    Ok(offsets.into_iter().map(Duration::from_secs_f64).collect())
}

fn poisson_offsets<R: Rng + ?Sized>(
    request_rate: f64,
    num_requests: usize,
    rng: &mut R,
) -> Result<Vec<f64>> {
    let exp = Exp::new(request_rate)
        .map_err(|e| BenchError::config(format!("invalid request rate {request_rate}: {e}")))?;
    let mut v: Vec<f64> = Vec::with_capacity(num_requests);
    let mut last = 0.0;
    for i in 0..num_requests {
        if i > 0 {
            last += exp.sample(rng);
        }
        v.push(last);
    }
    Ok(v)
}

fn fixed_offsets(request_rate: f64, num_requests: usize) -> Vec<f64> {
    let interval = 1.0 / request_rate;
    (0..num_requests).map(|i| i as f64 * interval).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn infinite_rate_sends_everything_at_once() {
        let mut rng = StdRng::seed_from_u64(0);
        let offsets =
            arrival_offsets(5, RequestRate::Infinite, ArrivalProcess::Poisson, &mut rng).unwrap();
        assert_eq!(offsets, vec![Duration::ZERO; 5]);
    }

    #[test]
    fn fixed_rate_spaces_requests_evenly() {
        let mut rng = StdRng::seed_from_u64(0);
        let offsets =
            arrival_offsets(4, RequestRate::PerSecond(4.0), ArrivalProcess::Fixed, &mut rng)
                .unwrap();
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_millis(750)
            ]
        );
    }

    #[test]
    fn poisson_offsets_increase_and_match_rate_on_average() {
        let mut rng = StdRng::seed_from_u64(42);
        let n = 20_000;
        let offsets =
            arrival_offsets(n, RequestRate::PerSecond(10.0), ArrivalProcess::Poisson, &mut rng)
                .unwrap();
        assert_eq!(offsets[0], Duration::ZERO);
        assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
        let mean_gap = offsets[n - 1].as_secs_f64() / (n - 1) as f64;
        assert!((mean_gap - 0.1).abs() < 0.005, "mean gap {mean_gap}");
    }

    #[test]
    fn same_seed_gives_same_schedule() {
        let a = arrival_offsets(
            50,
            RequestRate::PerSecond(3.0),
            ArrivalProcess::Poisson,
            &mut StdRng::seed_from_u64(9),
        )
        .unwrap();
        let b = arrival_offsets(
            50,
            RequestRate::PerSecond(3.0),
            ArrivalProcess::Poisson,
            &mut StdRng::seed_from_u64(9),
        )
        .unwrap();
        assert_eq!(a, b);
    }
}
