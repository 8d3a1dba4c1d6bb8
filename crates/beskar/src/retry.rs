//! Retry with exponential backoff.
//!
//! `retry_notify` runs a fallible async operation until it succeeds or the
//! policy's elapsed-time budget is spent, reporting every failed attempt to
//! a notify callback. The budget only bounds the schedule: a single attempt
//! must carry its own deadline.

use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};

/// Exponential backoff policy
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    /// Wait after the first failure
    pub initial_interval: Duration,
    /// Growth factor between consecutive waits
    pub multiplier: f64,
    /// Jitter, as a fraction of the current interval (0 disables jitter,
    /// values above 1 are treated as 1)
    pub randomization_factor: f64,
    /// Upper bound of a single wait
    pub max_interval: Duration,
    /// Give up once the next wait would cross this budget
    pub max_elapsed_time: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            randomization_factor: 0.5,
            max_interval: Duration::from_secs(60),
            max_elapsed_time: Duration::from_secs(15 * 60),
        }
    }
}

impl ExponentialBackoff {
    /// Default schedule bounded by `timeout`
    pub fn with_max_elapsed_time(timeout: Duration) -> Self {
        Self {
            max_elapsed_time: timeout,
            ..Default::default()
        }
    }

    fn randomize(&self, interval: Duration) -> Duration {
        let factor = self.randomization_factor.clamp(0.0, 1.0);
        if factor.is_nan() || factor == 0.0 {
            return interval;
        }
        let secs = interval.as_secs_f64();
        let delta = factor * secs;
        let mut rng = rand::rng();
        Duration::from_secs_f64(rng.random_range((secs - delta)..=(secs + delta)))
    }

    fn grow(&self, interval: Duration) -> Duration {
        let nanos = interval.as_nanos() as f64 * self.multiplier;
        Duration::from_nanos(nanos as u64).min(self.max_interval)
    }
}

/// Retry `op` following `policy`, calling `notify` with the error and the
/// upcoming wait after each failed attempt. Returns the last error once the
/// budget is exhausted.
pub async fn retry_notify<T, E, F, Fut, N>(
    policy: &ExponentialBackoff,
    mut op: F,
    mut notify: N,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    N: FnMut(&E, Duration),
{
    let start = Instant::now();
    let mut interval = policy.initial_interval;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let wait = policy.randomize(interval);
        if start.elapsed() + wait > policy.max_elapsed_time {
            return Err(err);
        }

        notify(&err, wait);
        tokio::time::sleep(wait).await;
        interval = policy.grow(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(budget: Duration) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(5),
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_interval: Duration::from_millis(20),
            max_elapsed_time: budget,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let mut attempts = 0;
        let mut notified = Vec::new();

        let result: Result<u32, String> = retry_notify(
            &fast(Duration::from_secs(5)),
            || {
                attempts += 1;
                let current = attempts;
                async move {
                    if current < 3 {
                        Err(format!("attempt {current} failed"))
                    } else {
                        Ok(current)
                    }
                }
            },
            |err, wait| notified.push((err.clone(), wait)),
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(notified.len(), 2);
        assert_eq!(notified[0], ("attempt 1 failed".to_string(), Duration::from_millis(5)));
        assert_eq!(notified[1].1, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_returns_last_error_when_budget_spent() {
        let mut attempts = 0u32;

        let result: Result<(), u32> = retry_notify(
            &fast(Duration::from_millis(60)),
            || {
                attempts += 1;
                let current = attempts;
                async move { Err(current) }
            },
            |_, _| {},
        )
        .await;

        let last = result.unwrap_err();
        assert!(last > 1);
        assert_eq!(last, attempts);
    }

    #[tokio::test]
    async fn test_zero_budget_runs_once() {
        let mut attempts = 0;
        let mut notified = 0;

        let result: Result<(), &str> = retry_notify(
            &fast(Duration::ZERO),
            || {
                attempts += 1;
                async { Err("down") }
            },
            |_, _| notified += 1,
        )
        .await;

        assert_eq!(result, Err("down"));
        assert_eq!(attempts, 1);
        assert_eq!(notified, 0);
    }

    #[test]
    fn test_interval_growth_is_capped() {
        let policy = fast(Duration::from_secs(1));
        assert_eq!(policy.grow(Duration::from_millis(5)), Duration::from_millis(10));
        assert_eq!(policy.grow(Duration::from_millis(15)), Duration::from_millis(20));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = ExponentialBackoff::with_max_elapsed_time(Duration::from_secs(1));
        for _ in 0..100 {
            let wait = policy.randomize(Duration::from_millis(500));
            assert!(wait >= Duration::from_millis(250) && wait <= Duration::from_millis(750));
        }
    }

    #[test]
    fn test_oversized_jitter_is_clamped() {
        let policy = ExponentialBackoff {
            randomization_factor: 2.5,
            ..Default::default()
        };
        for _ in 0..100 {
            let wait = policy.randomize(Duration::from_millis(500));
            assert!(wait <= Duration::from_millis(1000));
        }

        let policy = ExponentialBackoff {
            randomization_factor: f64::NAN,
            ..Default::default()
        };
        assert_eq!(policy.randomize(Duration::from_millis(500)), Duration::from_millis(500));
    }
}
