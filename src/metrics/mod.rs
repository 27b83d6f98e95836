//! Metrics collection for observability

use prometheus::{
    register_counter_vec_with_registry, register_histogram_vec_with_registry,
    register_histogram_with_registry, CounterVec, Encoder, Histogram, HistogramOpts,
    HistogramVec, Opts, Registry,
};
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> =
    Lazy::new(|| Arc::new(Metrics::new().expect("Failed to initialize metrics")));

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Backend metrics
    pub backend_requests: CounterVec,
    pub backend_retries: CounterVec,
    pub backend_request_duration: HistogramVec,
    pub rate_limit_wait: HistogramVec,

    // Agent metrics
    pub knowledge_truncations: CounterVec,
    pub history_evictions: CounterVec,
    pub agent_replies: CounterVec,

    // Round metrics
    pub summaries: CounterVec,
    pub round_duration: Histogram,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let backend_requests = register_counter_vec_with_registry!(
            Opts::new("backend_requests_total", "Backend calls by backend and outcome"),
            &["backend", "outcome"],
            registry
        )?;

        let backend_retries = register_counter_vec_with_registry!(
            Opts::new("backend_retries_total", "Backend retries by backend and error class"),
            &["backend", "error"],
            registry
        )?;

        let backend_request_duration = register_histogram_vec_with_registry!(
            "backend_request_duration_seconds",
            "Backend call duration in seconds, retries included",
            &["backend"],
            registry
        )?;

        let rate_limit_wait = register_histogram_vec_with_registry!(
            HistogramOpts::new(
                "rate_limit_wait_seconds",
                "Time spent waiting on a backend rate limiter"
            )
            .buckets(vec![0.0, 0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
            &["backend"],
            registry
        )?;

        let knowledge_truncations = register_counter_vec_with_registry!(
            Opts::new("knowledge_truncations_total", "Knowledge contexts truncated to budget"),
            &["agent"],
            registry
        )?;

        let history_evictions = register_counter_vec_with_registry!(
            Opts::new("history_evictions_total", "Exchanges evicted from agent history"),
            &["agent"],
            registry
        )?;

        let agent_replies = register_counter_vec_with_registry!(
            Opts::new("agent_replies_total", "Agent replies by outcome"),
            &["outcome"],
            registry
        )?;

        let summaries = register_counter_vec_with_registry!(
            Opts::new("summaries_total", "Summary generations by outcome"),
            &["outcome"],
            registry
        )?;

        let round_duration = register_histogram_with_registry!(
            "round_duration_seconds",
            "Wall time of a full panel round",
            registry
        )?;

        Ok(Self {
            registry,
            backend_requests,
            backend_retries,
            backend_request_duration,
            rate_limit_wait,
            knowledge_truncations,
            history_evictions,
            agent_replies,
            summaries,
            round_duration,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a finished backend call
    pub fn record_backend_request(&self, backend: &str, success: bool, elapsed: Duration) {
        let outcome = if success { "success" } else { "error" };
        self.backend_requests
            .with_label_values(&[backend, outcome])
            .inc();
        self.backend_request_duration
            .with_label_values(&[backend])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_retry(&self, backend: &str, error: &str) {
        self.backend_retries.with_label_values(&[backend, error]).inc();
    }

    pub fn record_rate_limit_wait(&self, backend: &str, waited: Duration) {
        self.rate_limit_wait
            .with_label_values(&[backend])
            .observe(waited.as_secs_f64());
    }

    pub fn record_truncation(&self, agent: &str) {
        self.knowledge_truncations.with_label_values(&[agent]).inc();
    }

    pub fn record_evictions(&self, agent: &str, count: usize) {
        if count > 0 {
            self.history_evictions
                .with_label_values(&[agent])
                .inc_by(count as f64);
        }
    }

    pub fn record_reply(&self, success: bool) {
        let outcome = if success { "answer" } else { "fallback" };
        self.agent_replies.with_label_values(&[outcome]).inc();
    }

    pub fn record_summary(&self, outcome: &str) {
        self.summaries.with_label_values(&[outcome]).inc();
    }

    pub fn record_round(&self, elapsed: Duration) {
        self.round_duration.observe(elapsed.as_secs_f64());
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = Metrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_export_contains_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_backend_request("chat_completions", true, Duration::from_millis(120));
        metrics.record_retry("chat_completions", "timeout");
        metrics.record_summary("success");

        let text = metrics.export_prometheus();
        assert!(text.contains("backend_requests_total"));
        assert!(text.contains("backend_retries_total"));
        assert!(text.contains("summaries_total"));
    }

    #[test]
    fn test_zero_evictions_are_not_counted() {
        let metrics = Metrics::new().unwrap();
        metrics.record_evictions("Alice Ward", 0);
        assert!(!metrics.export_prometheus().contains("history_evictions_total{"));
    }
}
