//! Language-model backends
//!
//! A backend turns a [`CompletionRequest`] into answer text. Adapters speak
//! one wire protocol each; the [`BackendRegistry`] pairs every adapter with
//! its rate limiter and tracks which model is active.

pub mod chat_completions;
pub mod error;
pub mod generate_content;
pub mod registry;
pub mod retry;

pub use chat_completions::ChatCompletionsBackend;
pub use error::BackendError;
pub use generate_content::GenerateContentBackend;
pub use registry::{BackendHandle, BackendRegistry};
pub use retry::{RetryConfig, RetryPolicy};

use crate::context::Exchange;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Wire protocol family a model is served through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelBackend {
    /// OpenAI-compatible `/chat/completions`
    ChatCompletions,
    /// Gemini-style `:generateContent`
    GenerateContent,
}

impl ModelBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelBackend::ChatCompletions => "chat_completions",
            ModelBackend::GenerateContent => "generate_content",
        }
    }
}

impl fmt::Display for ModelBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete model on a concrete backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub backend: ModelBackend,
    pub model_id: String,
}

impl ModelSpec {
    pub fn new(backend: ModelBackend, model_id: impl Into<String>) -> Self {
        Self {
            backend,
            model_id: model_id.into(),
        }
    }

    /// Pick the backend from the model name: `gemini*` models use
    /// generate-content, everything else chat completions
    pub fn infer(model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        let backend = if model_id.to_ascii_lowercase().starts_with("gemini") {
            ModelBackend::GenerateContent
        } else {
            ModelBackend::ChatCompletions
        };
        Self { backend, model_id }
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.model_id, self.backend)
    }
}

/// Everything an adapter needs for one completion
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    /// Prior exchanges, oldest first
    pub history: Vec<Exchange>,
    pub user_prompt: String,
    pub model_id: String,
    pub temperature: f32,
    /// Adapter default applies when unset
    pub max_output_tokens: Option<u32>,
}

/// One wire protocol
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError>;
}

type BackendFuture = Pin<Box<dyn Future<Output = Result<String, BackendError>> + Send>>;
type ErasedHandler = Box<dyn Fn(CompletionRequest) -> BackendFuture + Send + Sync>;

/// Backend backed by an async closure, for embedding and tests
pub struct FnBackend {
    handler: ErasedHandler,
}

impl FnBackend {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(CompletionRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, BackendError>> + Send + 'static,
    {
        let erased = move |request: CompletionRequest| -> BackendFuture { Box::pin(handler(request)) };
        Self {
            handler: Box::new(erased),
        }
    }
}

impl fmt::Debug for FnBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnBackend").finish_non_exhaustive()
    }
}

#[async_trait]
impl BackendAdapter for FnBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        (self.handler)(request.clone()).await
    }
}
