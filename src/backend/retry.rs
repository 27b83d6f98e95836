//! Retry with exponential backoff for transient backend failures

use super::error::BackendError;
use crate::metrics::METRICS;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

fn default_max_elapsed_secs() -> u64 {
    30
}

fn default_jitter() -> bool {
    true
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, the first call included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Cap on the total backoff slept between attempts. Time spent inside
    /// the attempts themselves is bounded by the client timeout instead.
    #[serde(default = "default_max_elapsed_secs")]
    pub max_elapsed_secs: u64,

    /// Scale each backoff by a random factor in [0.5, 1.0]
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_elapsed_secs: default_max_elapsed_secs(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_elapsed_secs)
    }
}

/// Retries transient failures, gives up immediately on permanent ones
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff before retrying after `attempt` (1-based), without jitter
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.config
            .base_backoff()
            .saturating_mul(multiplier)
            .min(self.config.max_backoff())
    }

    fn jittered(&self, backoff: Duration) -> Duration {
        if !self.config.jitter {
            return backoff;
        }
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        backoff.mul_f64(factor)
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// or backoff budget runs out. `operation` receives the 1-based attempt.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, BackendError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut waited = Duration::ZERO;
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_transient() {
                return Err(err);
            }

            if attempt >= max_attempts {
                error!("{} failed after {} attempts: {}", label, attempt, err);
                return Err(err);
            }

            let backoff = self.jittered(self.calculate_backoff(attempt));
            if waited + backoff > self.config.max_elapsed() {
                error!(
                    "{} retry budget of {:?} exhausted after {} attempts: {}",
                    label,
                    self.config.max_elapsed(),
                    attempt,
                    err
                );
                return Err(err);
            }

            warn!(
                "{} attempt {} failed: {}, retrying in {:?}",
                label, attempt, err, backoff
            );
            METRICS.record_retry(label, err.label());
            tokio::time::sleep(backoff).await;
            waited += backoff;
        }
    }
}
