//! Backend dispatch table and active-model selection

use super::chat_completions::ChatCompletionsBackend;
use super::error::BackendError;
use super::generate_content::GenerateContentBackend;
use super::retry::RetryPolicy;
use super::{BackendAdapter, CompletionRequest, ModelBackend, ModelSpec};
use crate::config::Config;
use crate::metrics::METRICS;
use crate::quota::{InMemoryQuotaTracker, QuotaSnapshot, QuotaTracker};
use crate::ratelimit::BackendLimiter;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, info};

/// An adapter paired with the limiter guarding it
#[derive(Clone)]
pub struct BackendHandle {
    pub adapter: Arc<dyn BackendAdapter>,
    pub limiter: Arc<BackendLimiter>,
}

/// Owns every backend client and limiter for one panel
pub struct BackendRegistry {
    backends: HashMap<ModelBackend, BackendHandle>,
    active: RwLock<ModelSpec>,
    retry: RetryPolicy,
    quota: Option<Arc<dyn QuotaTracker>>,
}

impl BackendRegistry {
    pub fn new(active: ModelSpec, retry: RetryPolicy) -> Self {
        Self {
            backends: HashMap::new(),
            active: RwLock::new(active),
            retry,
            quota: None,
        }
    }

    /// Register (or replace) the adapter and limiter for a backend
    pub fn with_backend(
        mut self,
        backend: ModelBackend,
        adapter: Arc<dyn BackendAdapter>,
        limiter: BackendLimiter,
    ) -> Self {
        self.backends.insert(
            backend,
            BackendHandle {
                adapter,
                limiter: Arc::new(limiter),
            },
        );
        self
    }

    pub fn with_quota_tracker(mut self, tracker: Arc<dyn QuotaTracker>) -> Self {
        self.quota = Some(tracker);
        self
    }

    /// Build both HTTP backends, their limiters and the quota tracker
    pub fn from_config(config: &Config) -> Result<Self, BackendError> {
        let chat = &config.backends.chat_completions;
        let generate = &config.backends.generate_content;

        let registry = Self::new(
            config.model.active_spec(),
            RetryPolicy::new(config.retry.clone()),
        )
        .with_backend(
            ModelBackend::ChatCompletions,
            Arc::new(ChatCompletionsBackend::new(chat)?),
            BackendLimiter::from_config(&chat.rate_limit),
        )
        .with_backend(
            ModelBackend::GenerateContent,
            Arc::new(GenerateContentBackend::new(generate)?),
            BackendLimiter::from_config(&generate.rate_limit),
        )
        .with_quota_tracker(Arc::new(InMemoryQuotaTracker::new(config.quota.clone())));

        info!("Backend registry ready, active model {}", registry.active_model());
        Ok(registry)
    }

    pub fn active_model(&self) -> ModelSpec {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Switch the model used by subsequent calls. Fails if no adapter is
    /// registered for the model's backend.
    pub fn set_active_model(&self, spec: ModelSpec) -> Result<(), BackendError> {
        if !self.backends.contains_key(&spec.backend) {
            return Err(BackendError::Unsupported(format!(
                "No {} backend registered for {}",
                spec.backend, spec.model_id
            )));
        }

        info!("Switching active model to {}", spec);
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = spec;
        Ok(())
    }

    pub fn quota_snapshot(&self, model_id: &str) -> Option<QuotaSnapshot> {
        self.quota.as_ref().map(|tracker| tracker.snapshot(model_id))
    }

    /// Call `spec`'s backend: acquire its limiter, then the adapter, retrying
    /// transient failures. Every attempt passes the limiter again.
    pub async fn dispatch(
        &self,
        spec: &ModelSpec,
        request: &CompletionRequest,
    ) -> Result<String, BackendError> {
        let handle = self.backends.get(&spec.backend).ok_or_else(|| {
            BackendError::Unsupported(format!("No {} backend registered", spec.backend))
        })?;
        let label = spec.backend.as_str();
        let start = Instant::now();

        let result = self
            .retry
            .run(label, |attempt| async move {
                let waited = handle.limiter.acquire().await;
                METRICS.record_rate_limit_wait(label, waited);
                if !waited.is_zero() {
                    debug!("Waited {:?} on {} limiter", waited, label);
                }

                if let Some(tracker) = &self.quota {
                    tracker.record_request(&spec.model_id);
                }

                debug!("Dispatching to {} (attempt {})", spec, attempt);
                handle.adapter.complete(request).await
            })
            .await;

        METRICS.record_backend_request(label, result.is_ok(), start.elapsed());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FnBackend, RetryConfig};
    use crate::ratelimit::IntervalLimiter;

    fn request() -> CompletionRequest {
        CompletionRequest {
            system_prompt: "system".to_string(),
            history: Vec::new(),
            user_prompt: "question".to_string(),
            model_id: String::new(),
            temperature: 0.7,
            max_output_tokens: None,
        }
    }

    fn registry() -> BackendRegistry {
        BackendRegistry::new(
            ModelSpec::infer("grok-beta"),
            RetryPolicy::new(RetryConfig {
                jitter: false,
                ..Default::default()
            }),
        )
        .with_backend(
            ModelBackend::ChatCompletions,
            Arc::new(FnBackend::new(|_| async { Ok("chat".to_string()) })),
            IntervalLimiter::per_second(1000.0).into(),
        )
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_backend() {
        let registry = registry().with_backend(
            ModelBackend::GenerateContent,
            Arc::new(FnBackend::new(|_| async { Ok("gemini".to_string()) })),
            IntervalLimiter::per_second(1000.0).into(),
        );

        let chat = registry
            .dispatch(&ModelSpec::infer("grok-beta"), &request())
            .await
            .unwrap();
        let gemini = registry
            .dispatch(&ModelSpec::infer("gemini-1.5-flash"), &request())
            .await
            .unwrap();

        assert_eq!(chat, "chat");
        assert_eq!(gemini, "gemini");
    }

    #[tokio::test]
    async fn test_unregistered_backend_rejected() {
        let registry = registry();

        let err = registry
            .set_active_model(ModelSpec::infer("gemini-2.0-flash-exp"))
            .unwrap_err();
        assert!(matches!(err, BackendError::Unsupported(_)));
        assert_eq!(registry.active_model().model_id, "grok-beta");

        let err = registry
            .dispatch(&ModelSpec::infer("gemini-2.0-flash-exp"), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_dispatch_records_quota() {
        let tracker = Arc::new(InMemoryQuotaTracker::new(Default::default()));
        let registry = registry().with_quota_tracker(tracker.clone());

        registry
            .dispatch(&ModelSpec::infer("grok-beta"), &request())
            .await
            .unwrap();

        assert_eq!(tracker.snapshot("grok-beta").used_in_window, 1);
        assert_eq!(registry.quota_snapshot("grok-beta").unwrap().remaining_requests, 59);
    }

    #[tokio::test]
    async fn test_from_config_uses_configured_model() {
        let mut config = Config::default();
        config.model.active = "gemini-1.5-flash".to_string();

        let registry = BackendRegistry::from_config(&config).unwrap();

        assert_eq!(registry.active_model(), config.model.active_spec());
        assert_eq!(registry.active_model().backend, ModelBackend::GenerateContent);
        assert!(registry.quota_snapshot("gemini-1.5-flash").is_some());
        registry
            .set_active_model(ModelSpec::infer("grok-beta"))
            .unwrap();
    }
}
