//! OpenAI-compatible chat completions backend

use super::error::BackendError;
use super::{BackendAdapter, CompletionRequest};
use crate::ratelimit::RateLimitConfig;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

fn default_base_url() -> String {
    "https://api.x.ai/v1".to_string()
}

fn default_api_key_env() -> String {
    "XAI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_rate_limit() -> RateLimitConfig {
    RateLimitConfig::Interval {
        requests_per_second: 1.0,
    }
}

/// Chat completions backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionsConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key. Empty disables auth.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Explicit key, takes precedence over `api_key_env`
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub max_output_tokens: Option<u32>,

    #[serde(default = "default_rate_limit")]
    pub rate_limit: RateLimitConfig,
}

impl Default for ChatCompletionsConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            max_output_tokens: None,
            rate_limit: default_rate_limit(),
        }
    }
}

impl ChatCompletionsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Explicit key, else the environment variable, else none
    pub fn resolve_api_key(&self) -> Option<SecretString> {
        self.api_key.clone().or_else(|| {
            std::env::var(&self.api_key_env)
                .ok()
                .filter(|key| !key.trim().is_empty())
                .map(SecretString::new)
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Calls `POST {base_url}/chat/completions`
pub struct ChatCompletionsBackend {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
    api_key_env: String,
    max_output_tokens: Option<u32>,
}

impl ChatCompletionsBackend {
    pub fn new(config: &ChatCompletionsConfig) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| BackendError::Unsupported(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.resolve_api_key(),
            api_key_env: config.api_key_env.clone(),
            max_output_tokens: config.max_output_tokens,
        })
    }

    fn build_body<'a>(&self, request: &'a CompletionRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(request.history.len() * 2 + 2);
        messages.push(ChatMessage {
            role: "system",
            content: &request.system_prompt,
        });
        for exchange in &request.history {
            messages.push(ChatMessage {
                role: "user",
                content: &exchange.question,
            });
            messages.push(ChatMessage {
                role: "assistant",
                content: &exchange.answer,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.user_prompt,
        });

        ChatRequest {
            model: &request.model_id,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_output_tokens.or(self.max_output_tokens),
        }
    }
}

#[async_trait]
impl BackendAdapter for ChatCompletionsBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(request);

        debug!(
            "Calling chat completions: model={}, messages={}",
            request.model_id,
            body.messages.len()
        );

        let mut req = self.http.post(&url).json(&body);
        match &self.api_key {
            Some(api_key) => req = req.bearer_auth(api_key.expose_secret()),
            None if !self.api_key_env.is_empty() => {
                return Err(BackendError::MissingCredentials(format!(
                    "{} is not set",
                    self.api_key_env
                )));
            }
            None => {}
        }

        let response = req.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(BackendError::from_status(status, text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| BackendError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| BackendError::InvalidResponse("No content in response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CharTokenizer, Exchange};

    #[test]
    fn test_body_alternates_history_roles() {
        let backend = ChatCompletionsBackend::new(&ChatCompletionsConfig::default()).unwrap();
        let request = CompletionRequest {
            system_prompt: "You are Alice Ward".to_string(),
            history: vec![Exchange::new("first?", "first.", &CharTokenizer)],
            user_prompt: "second?".to_string(),
            model_id: "grok-beta".to_string(),
            temperature: 0.7,
            max_output_tokens: None,
        };

        let json = serde_json::to_value(backend.build_body(&request)).unwrap();
        let roles: Vec<_> = json["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();

        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(json["messages"][3]["content"], "second?");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_explicit_key_wins() {
        let config = ChatCompletionsConfig {
            api_key: Some(SecretString::new("sk-test".to_string())),
            api_key_env: "EXPERT_PANEL_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        };
        let key = config.resolve_api_key().unwrap();
        assert_eq!(key.expose_secret(), "sk-test");
    }
}
