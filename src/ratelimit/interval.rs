//! Single-flight fixed-interval limiter

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum gap between consecutive grants
///
/// Callers queue on an async mutex, so only one of them is ever inside the
/// wait-then-record section.
#[derive(Debug)]
pub struct IntervalLimiter {
    interval: Duration,
    last_grant: Mutex<Option<Instant>>,
}

impl IntervalLimiter {
    /// Limiter allowing `requests_per_second` grants per second.
    /// Non-positive or non-finite rates disable throttling.
    pub fn per_second(requests_per_second: f64) -> Self {
        let interval = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self::with_interval(interval)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            last_grant: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Suspend until the interval has passed since the previous grant,
    /// returning the time spent waiting
    pub async fn acquire(&self) -> Duration {
        let mut last_grant = self.last_grant.lock().await;
        let requested = Instant::now();

        if let Some(previous) = *last_grant {
            let ready = previous + self.interval;
            if ready > requested {
                tokio::time::sleep_until(ready).await;
            }
        }

        let granted = Instant::now();
        *last_grant = Some(granted);
        granted.saturating_duration_since(requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_first_acquire_is_immediate() {
        let limiter = IntervalLimiter::per_second(1.0);
        assert_eq!(limiter.acquire().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enforces_gap() {
        let limiter = IntervalLimiter::per_second(2.0);
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_spaced() {
        let limiter = Arc::new(IntervalLimiter::per_second(10.0));
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut grants = Vec::new();
        for handle in handles {
            grants.push(handle.await.unwrap());
        }
        grants.sort();

        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
        assert!(grants[3] - start >= Duration::from_millis(300));
    }

    #[test]
    fn test_zero_rate_disables_throttling() {
        assert_eq!(IntervalLimiter::per_second(0.0).interval(), Duration::ZERO);
        assert_eq!(IntervalLimiter::per_second(f64::NAN).interval(), Duration::ZERO);
    }
}
