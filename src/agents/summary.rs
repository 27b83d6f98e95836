//! Cross-expert synthesis

use crate::backend::{BackendError, BackendRegistry, CompletionRequest};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Shown in place of a summary that could not be produced
pub const SUMMARY_FALLBACK: &str = "Sorry, a summary could not be generated this time.";

/// Summarizer trait for different synthesis strategies
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Synthesize the experts' `(name, answer)` pairs for `prompt`
    async fn summarize(
        &self,
        prompt: &str,
        responses: &[(String, String)],
    ) -> Result<String, BackendError>;
}

/// Summarizes through the active model of a backend registry
pub struct SummaryGenerator {
    registry: Arc<BackendRegistry>,
    panel_name: String,
    temperature: f32,
}

impl SummaryGenerator {
    pub fn new(registry: Arc<BackendRegistry>, panel_name: impl Into<String>, temperature: f32) -> Self {
        Self {
            registry,
            panel_name: panel_name.into(),
            temperature,
        }
    }

    /// Build the synthesis prompt
    pub fn build_prompt(&self, prompt: &str, responses: &[(String, String)]) -> String {
        let answers = responses
            .iter()
            .map(|(name, answer)| format!("{}: {}", name, answer))
            .collect::<Vec<_>>()
            .join("\n\n");

        format!(
            "As {}, your task is to summarize and integrate the views of the experts below.\n\n\
            The question they were asked:\n{}\n\n\
            Their analyses:\n\n{}\n\n\
            Please:\n\
            1. Summarize the main problems the experts identified\n\
            2. List the areas that need deeper research\n\
            3. Note where the experts agree and where they disagree\n\
            4. Give one integrated recommendation",
            self.panel_name, prompt, answers
        )
    }
}

#[async_trait]
impl Summarizer for SummaryGenerator {
    async fn summarize(
        &self,
        prompt: &str,
        responses: &[(String, String)],
    ) -> Result<String, BackendError> {
        let spec = self.registry.active_model();
        debug!("Summarizing {} responses with {}", responses.len(), spec);

        let request = CompletionRequest {
            system_prompt: format!("You are {}.", self.panel_name),
            history: Vec::new(),
            user_prompt: self.build_prompt(prompt, responses),
            model_id: spec.model_id.clone(),
            temperature: self.temperature,
            max_output_tokens: None,
        };

        self.registry.dispatch(&spec, &request).await
    }
}
