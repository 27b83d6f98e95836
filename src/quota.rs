//! Advisory per-model request quotas
//!
//! Quotas never block a call. The orchestrator checks them at round start
//! and logs a warning when a full round would overrun the model's limit.

use crate::ratelimit::{RequestLog, DEFAULT_WINDOW};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Limits for one model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelQuota {
    pub requests_per_minute: u32,
    /// Calls one panel round consumes (agents plus summary)
    pub requests_per_conversation: u32,
}

impl Default for ModelQuota {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_conversation: 5,
        }
    }
}

fn default_models() -> HashMap<String, ModelQuota> {
    let mut models = HashMap::new();
    models.insert(
        "gemini-2.0-flash-exp".to_string(),
        ModelQuota {
            requests_per_minute: 10,
            requests_per_conversation: 5,
        },
    );
    models.insert(
        "gemini-1.5-flash".to_string(),
        ModelQuota {
            requests_per_minute: 10,
            requests_per_conversation: 5,
        },
    );
    models.insert(
        "grok-beta".to_string(),
        ModelQuota {
            requests_per_minute: 60,
            requests_per_conversation: 5,
        },
    );
    models
}

/// Quota configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_models")]
    pub models: HashMap<String, ModelQuota>,

    /// Applied to models without their own entry
    #[serde(default)]
    pub fallback: ModelQuota,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            fallback: ModelQuota::default(),
        }
    }
}

impl QuotaConfig {
    pub fn quota_for(&self, model_id: &str) -> ModelQuota {
        self.models.get(model_id).copied().unwrap_or(self.fallback)
    }
}

/// Point-in-time view of one model's quota
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    pub model_id: String,
    pub requests_per_minute: u32,
    pub used_in_window: u32,
    pub remaining_requests: u32,
    pub remaining_conversations: u32,
    /// Zero when a request slot is free now
    pub seconds_until_available: u64,
}

/// Records backend usage and reports remaining capacity
pub trait QuotaTracker: Send + Sync {
    fn record_request(&self, model_id: &str);

    fn snapshot(&self, model_id: &str) -> QuotaSnapshot;

    /// Whether `required` more requests fit in the current window
    fn has_capacity(&self, model_id: &str, required: u32) -> bool {
        self.snapshot(model_id).remaining_requests >= required
    }
}

/// Process-local tracker keeping a sliding one-minute log per model
#[derive(Debug)]
pub struct InMemoryQuotaTracker {
    config: QuotaConfig,
    logs: Mutex<HashMap<String, RequestLog>>,
}

impl InMemoryQuotaTracker {
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            config,
            logs: Mutex::new(HashMap::new()),
        }
    }
}

impl QuotaTracker for InMemoryQuotaTracker {
    fn record_request(&self, model_id: &str) {
        let now = Instant::now();
        let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        let log = logs
            .entry(model_id.to_string())
            .or_insert_with(|| RequestLog::new(DEFAULT_WINDOW));
        log.prune(now);
        log.record(now);
        debug!("Quota usage for {}: {} in window", model_id, log.len());
    }

    fn snapshot(&self, model_id: &str) -> QuotaSnapshot {
        let quota = self.config.quota_for(model_id);
        let now = Instant::now();

        let (used, wait) = {
            let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
            match logs.get_mut(model_id) {
                Some(log) => {
                    let pruned = log.prune(now);
                    if pruned > 0 {
                        debug!("Pruned {} expired requests for {}", pruned, model_id);
                    }
                    let used = log.len() as u32;
                    let wait = if used >= quota.requests_per_minute {
                        log.time_until_oldest_expires(now).unwrap_or(Duration::ZERO)
                    } else {
                        Duration::ZERO
                    };
                    (used, wait)
                }
                None => (0, Duration::ZERO),
            }
        };

        let remaining = quota.requests_per_minute.saturating_sub(used);
        let per_conversation = quota.requests_per_conversation.max(1);
        let snapshot = QuotaSnapshot {
            model_id: model_id.to_string(),
            requests_per_minute: quota.requests_per_minute,
            used_in_window: used,
            remaining_requests: remaining,
            remaining_conversations: remaining / per_conversation,
            seconds_until_available: wait.as_secs_f64().ceil() as u64,
        };

        if snapshot.remaining_requests == 0 {
            warn!(
                "Quota for {} exhausted, next slot in {}s",
                model_id, snapshot.seconds_until_available
            );
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_tracks_usage() {
        let tracker = InMemoryQuotaTracker::new(QuotaConfig::default());
        for _ in 0..6 {
            tracker.record_request("gemini-2.0-flash-exp");
        }

        let snapshot = tracker.snapshot("gemini-2.0-flash-exp");
        assert_eq!(snapshot.used_in_window, 6);
        assert_eq!(snapshot.remaining_requests, 4);
        assert_eq!(snapshot.remaining_conversations, 0);
        assert!(!tracker.has_capacity("gemini-2.0-flash-exp", 5));
        assert!(tracker.has_capacity("grok-beta", 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_quota_reports_wait() {
        let tracker = InMemoryQuotaTracker::new(QuotaConfig::default());
        for _ in 0..10 {
            tracker.record_request("gemini-1.5-flash");
        }
        tokio::time::advance(Duration::from_secs(20)).await;

        let snapshot = tracker.snapshot("gemini-1.5-flash");
        assert_eq!(snapshot.remaining_requests, 0);
        assert_eq!(snapshot.seconds_until_available, 40);

        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(tracker.snapshot("gemini-1.5-flash").remaining_requests, 10);
    }

    #[test]
    fn test_unknown_model_uses_fallback() {
        let tracker = InMemoryQuotaTracker::new(QuotaConfig::default());
        let snapshot = tracker.snapshot("some-new-model");
        assert_eq!(snapshot.requests_per_minute, 60);
        assert_eq!(snapshot.remaining_conversations, 12);
    }
}
