//! Outbound request throttling
//!
//! Each backend owns exactly one limiter; limiters never share state.

pub mod interval;
pub mod window;

pub use interval::IntervalLimiter;
pub use window::{RequestLog, SlidingWindowLimiter, DEFAULT_WINDOW};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limiter settings for one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateLimitConfig {
    /// Minimum gap of `1 / requests_per_second` between calls
    Interval { requests_per_second: f64 },
    /// At most `requests_per_minute` calls in any trailing minute
    SlidingWindow { requests_per_minute: u32 },
}

/// Either limiter variant behind one `acquire`
#[derive(Debug)]
pub enum BackendLimiter {
    Interval(IntervalLimiter),
    SlidingWindow(SlidingWindowLimiter),
}

impl BackendLimiter {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        match config {
            RateLimitConfig::Interval {
                requests_per_second,
            } => BackendLimiter::Interval(IntervalLimiter::per_second(*requests_per_second)),
            RateLimitConfig::SlidingWindow {
                requests_per_minute,
            } => BackendLimiter::SlidingWindow(SlidingWindowLimiter::per_minute(
                *requests_per_minute,
            )),
        }
    }

    /// Suspend until the backend may be called, returning the time waited
    pub async fn acquire(&self) -> Duration {
        match self {
            BackendLimiter::Interval(limiter) => limiter.acquire().await,
            BackendLimiter::SlidingWindow(limiter) => limiter.acquire().await,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BackendLimiter::Interval(_) => "interval",
            BackendLimiter::SlidingWindow(_) => "sliding_window",
        }
    }
}

impl From<IntervalLimiter> for BackendLimiter {
    fn from(limiter: IntervalLimiter) -> Self {
        BackendLimiter::Interval(limiter)
    }
}

impl From<SlidingWindowLimiter> for BackendLimiter {
    fn from(limiter: SlidingWindowLimiter) -> Self {
        BackendLimiter::SlidingWindow(limiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserializes_tagged() {
        let config: RateLimitConfig =
            serde_json::from_str(r#"{"kind":"sliding_window","requests_per_minute":10}"#).unwrap();
        assert_eq!(
            config,
            RateLimitConfig::SlidingWindow {
                requests_per_minute: 10
            }
        );
        assert_eq!(BackendLimiter::from_config(&config).kind(), "sliding_window");
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_variant_waits() {
        let limiter = BackendLimiter::from_config(&RateLimitConfig::Interval {
            requests_per_second: 1.0,
        });

        assert_eq!(limiter.acquire().await, Duration::ZERO);
        assert!(limiter.acquire().await >= Duration::from_millis(999));
    }
}
