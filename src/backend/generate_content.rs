//! Gemini-style generate-content backend

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
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_output_tokens() -> u32 {
    1_000
}

fn default_rate_limit() -> RateLimitConfig {
    RateLimitConfig::SlidingWindow {
        requests_per_minute: 10,
    }
}

/// Generate-content backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateContentConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Explicit key, takes precedence over `api_key_env`
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_rate_limit")]
    pub rate_limit: RateLimitConfig,
}

impl Default for GenerateContentConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            max_output_tokens: default_max_output_tokens(),
            rate_limit: default_rate_limit(),
        }
    }
}

impl GenerateContentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

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
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

impl<'a> Content<'a> {
    fn text(role: Option<&'static str>, text: &'a str) -> Self {
        Self {
            role,
            parts: vec![Part { text }],
        }
    }
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Calls `POST {base_url}/models/{model}:generateContent`
pub struct GenerateContentBackend {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
    api_key_env: String,
    max_output_tokens: u32,
}

impl GenerateContentBackend {
    pub fn new(config: &GenerateContentConfig) -> Result<Self, BackendError> {
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

    fn build_body<'a>(&self, request: &'a CompletionRequest) -> GenerateRequest<'a> {
        let mut contents = Vec::with_capacity(request.history.len() * 2 + 1);
        for exchange in &request.history {
            contents.push(Content::text(Some("user"), &exchange.question));
            contents.push(Content::text(Some("model"), &exchange.answer));
        }
        contents.push(Content::text(Some("user"), &request.user_prompt));

        GenerateRequest {
            system_instruction: Content::text(None, &request.system_prompt),
            contents,
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens.unwrap_or(self.max_output_tokens),
            },
        }
    }
}

#[async_trait]
impl BackendAdapter for GenerateContentBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            BackendError::MissingCredentials(format!("{} is not set", self.api_key_env))
        })?;

        let url = format!("{}/models/{}:generateContent", self.base_url, request.model_id);
        let body = self.build_body(request);

        debug!(
            "Calling generate content: model={}, contents={}",
            request.model_id,
            body.contents.len()
        );

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(BackendError::from_status(status, text));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| BackendError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().next())
            .and_then(|part| part.text)
            .ok_or_else(|| BackendError::InvalidResponse("No candidates in response".to_string()))
    }
}
