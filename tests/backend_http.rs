//! HTTP-level tests for the two backend adapters against a mock server

use expert_panel::backend::chat_completions::ChatCompletionsConfig;
use expert_panel::backend::generate_content::GenerateContentConfig;
use expert_panel::prelude::*;
use expert_panel::ratelimit::RateLimitConfig;
use mockito::Matcher;
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;

fn request(model_id: &str) -> CompletionRequest {
    CompletionRequest {
        system_prompt: "You are Alice Ward".to_string(),
        history: vec![Exchange::new("Earlier question", "Earlier answer", &CharTokenizer)],
        user_prompt: "Is this thesis sound?".to_string(),
        model_id: model_id.to_string(),
        temperature: 0.7,
        max_output_tokens: None,
    }
}

fn chat_config(url: &str) -> ChatCompletionsConfig {
    ChatCompletionsConfig {
        base_url: url.to_string(),
        api_key: Some(SecretString::new("sk-test".to_string())),
        ..Default::default()
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(RetryConfig {
        base_backoff_ms: 1,
        max_backoff_ms: 5,
        jitter: false,
        ..Default::default()
    })
}

#[tokio::test]
async fn test_chat_completions_request_shape() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(json!({
            "model": "grok-beta",
            "messages": [
                {"role": "system", "content": "You are Alice Ward"},
                {"role": "user", "content": "Earlier question"},
                {"role": "assistant", "content": "Earlier answer"},
                {"role": "user", "content": "Is this thesis sound?"}
            ]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"Mostly, but check the moat."}}]}"#)
        .expect(1)
        .create_async()
        .await;

    let backend = ChatCompletionsBackend::new(&chat_config(&server.url())).unwrap();
    let answer = backend.complete(&request("grok-beta")).await.unwrap();

    assert_eq!(answer, "Mostly, but check the moat.");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_chat_completions_missing_choices_is_invalid() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(r#"{"choices":[]}"#)
        .create_async()
        .await;

    let backend = ChatCompletionsBackend::new(&chat_config(&server.url())).unwrap();
    let err = backend.complete(&request("grok-beta")).await.unwrap_err();

    assert!(matches!(err, BackendError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_generate_content_request_shape() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/models/gemini-2.0-flash-exp:generateContent")
        .match_header("x-goog-api-key", "g-test")
        .match_body(Matcher::PartialJson(json!({
            "systemInstruction": {"parts": [{"text": "You are Alice Ward"}]},
            "contents": [
                {"role": "user", "parts": [{"text": "Earlier question"}]},
                {"role": "model", "parts": [{"text": "Earlier answer"}]},
                {"role": "user", "parts": [{"text": "Is this thesis sound?"}]}
            ],
            "generationConfig": {"maxOutputTokens": 1000}
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Look at unit economics."}]}}]}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let backend = GenerateContentBackend::new(&GenerateContentConfig {
        base_url: server.url(),
        api_key: Some(SecretString::new("g-test".to_string())),
        ..Default::default()
    })
    .unwrap();
    let answer = backend.complete(&request("gemini-2.0-flash-exp")).await.unwrap();

    assert_eq!(answer, "Look at unit economics.");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_generate_content_quota_exhausted_is_permanent() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/models/gemini-1.5-flash:generateContent")
        .with_status(429)
        .with_body(r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED"}}"#)
        .create_async()
        .await;

    let backend = GenerateContentBackend::new(&GenerateContentConfig {
        base_url: server.url(),
        api_key: Some(SecretString::new("g-test".to_string())),
        ..Default::default()
    })
    .unwrap();
    let err = backend.complete(&request("gemini-1.5-flash")).await.unwrap_err();

    assert!(matches!(err, BackendError::QuotaExhausted(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_registry_retries_server_errors() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(503)
        .with_body("overloaded")
        .expect(3)
        .create_async()
        .await;

    let config = chat_config(&server.url());
    let registry = BackendRegistry::new(ModelSpec::infer("grok-beta"), fast_retry()).with_backend(
        ModelBackend::ChatCompletions,
        Arc::new(ChatCompletionsBackend::new(&config).unwrap()),
        BackendLimiter::from_config(&RateLimitConfig::Interval {
            requests_per_second: 1000.0,
        }),
    );

    let err = registry
        .dispatch(&ModelSpec::infer("grok-beta"), &request("grok-beta"))
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::Upstream { status: 503, .. }));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_registry_does_not_retry_client_errors() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(400)
        .with_body(r#"{"error":"bad request"}"#)
        .expect(1)
        .create_async()
        .await;

    let config = chat_config(&server.url());
    let registry = BackendRegistry::new(ModelSpec::infer("grok-beta"), fast_retry()).with_backend(
        ModelBackend::ChatCompletions,
        Arc::new(ChatCompletionsBackend::new(&config).unwrap()),
        BackendLimiter::from_config(&RateLimitConfig::Interval {
            requests_per_second: 1000.0,
        }),
    );

    let err = registry
        .dispatch(&ModelSpec::infer("grok-beta"), &request("grok-beta"))
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::Upstream { status: 400, .. }));
    mock.assert_async().await;
}
