//! Adapter tests against a mock HTTP server, plus live tests marked #[ignore]
//!
//! Live tests require a running backend:
//! - Ollama on localhost:11434 for the local tests
//! - ANTHROPIC_API_KEY for the cloud tests
//!
//! Run with: cargo test -p lfr-llm --test llm_integration -- --ignored

use std::time::Duration;

use lfr_llm::{AnthropicProvider, LlmError, LlmProvider, LlmRequest, OllamaProvider, Turn};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn conversation() -> LlmRequest {
    LlmRequest::new(vec![Turn::system("Be brief"), Turn::user("What is 2 + 2?")])
        .with_temperature(0.2)
}

#[tokio::test]
async fn test_ollama_chat_normalizes_usage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "llama3.2:latest",
            "stream": false,
            "messages": [
                {"role": "system", "content": "Be brief"},
                {"role": "user", "content": "What is 2 + 2?"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3.2:latest",
            "message": {"role": "assistant", "content": "4"},
            "prompt_eval_count": 12,
            "eval_count": 3
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OllamaProvider::with_url(&server.uri(), "llama3.2:latest");
    let response = provider.complete(conversation()).await.unwrap();

    assert_eq!(response.content, "4");
    assert_eq!(response.usage.prompt_tokens, Some(12));
    assert_eq!(response.usage.completion_tokens, Some(3));
    assert_eq!(response.usage.total_tokens, Some(15));
}

#[tokio::test]
async fn test_ollama_missing_counter_leaves_total_absent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {"content": "hello"},
            "eval_count": 3
        })))
        .mount(&server)
        .await;

    let provider = OllamaProvider::with_url(&server.uri(), "llama3.2:latest");
    let response = provider.complete(conversation()).await.unwrap();

    assert_eq!(response.usage.prompt_tokens, None);
    assert_eq!(response.usage.completion_tokens, Some(3));
    assert_eq!(response.usage.total_tokens, None);
    assert_eq!(response.model, "llama3.2:latest");
}

#[tokio::test]
async fn test_ollama_falls_back_to_generate_on_404() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "prompt": "System: Be brief\n\nUser: What is 2 + 2?\n\nAssistant:",
            "options": {"temperature": 0.2}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "4",
            "prompt_eval_count": 20,
            "eval_count": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OllamaProvider::with_url(&server.uri(), "llama3.2:latest");
    let response = provider.complete(conversation()).await.unwrap();

    assert_eq!(response.content, "4");
    assert_eq!(response.usage.total_tokens, Some(21));
}

#[tokio::test]
async fn test_ollama_server_error_does_not_try_legacy_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let provider = OllamaProvider::with_url(&server.uri(), "llama3.2:latest");
    let err = provider.complete(conversation()).await.unwrap_err();

    assert!(matches!(err, LlmError::Unavailable(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_ollama_timeout_is_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(500))
                .set_body_json(json!({"message": {"content": "late"}})),
        )
        .mount(&server)
        .await;

    let provider = OllamaProvider::with_timeout(
        &server.uri(),
        "llama3.2:latest",
        Duration::from_millis(50),
    );
    let err = provider.complete(conversation()).await.unwrap_err();

    assert!(matches!(err, LlmError::Unavailable(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_ollama_garbage_body_is_protocol_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let provider = OllamaProvider::with_url(&server.uri(), "llama3.2:latest");
    let err = provider.complete(conversation()).await.unwrap_err();

    assert!(matches!(err, LlmError::Protocol(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_anthropic_messages_request_shape() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-3-haiku-20240307",
            "system": "Be brief",
            "max_tokens": 1024,
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "What is 2 + 2?"}]}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [
                {"type": "text", "text": "Four."},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "Definitely four."}
            ],
            "usage": {"input_tokens": 9}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::with_url(
        &server.uri(),
        "sk-ant-test",
        "claude-3-haiku-20240307",
        Duration::from_secs(5),
    );
    let response = provider.complete(conversation()).await.unwrap();

    assert_eq!(response.content, "Four.\nDefinitely four.");
    assert_eq!(response.usage.prompt_tokens, Some(9));
    assert_eq!(response.usage.completion_tokens, None);
    assert_eq!(response.usage.total_tokens, Some(9));
}

#[tokio::test]
async fn test_anthropic_falls_back_to_complete_on_404() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/complete"))
        .and(body_partial_json(json!({
            "prompt": "\n\nHuman: Be brief\n\nAssistant:\n\nHuman: What is 2 + 2?\n\nAssistant:",
            "max_tokens_to_sample": 1024,
            "stop_sequences": ["\n\nHuman:"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "completion": "  4  ",
            "usage": {"input_tokens": 5, "output_tokens": 1}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::with_url(
        &server.uri(),
        "sk-ant-test",
        "claude-3-haiku-20240307",
        Duration::from_secs(5),
    );
    let response = provider.complete(conversation()).await.unwrap();

    assert_eq!(response.content, "4");
    assert_eq!(response.usage.total_tokens, Some(6));
}

#[tokio::test]
async fn test_anthropic_404_everywhere_is_protocol_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::with_url(
        &server.uri(),
        "sk-ant-test",
        "claude-3-haiku-20240307",
        Duration::from_secs(5),
    );
    let err = provider.complete(conversation()).await.unwrap_err();

    match err {
        LlmError::Protocol(msg) => assert!(msg.contains("ANTHROPIC_BETA")),
        other => panic!("expected protocol error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_anthropic_beta_header_forwarded() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("anthropic-beta", "preview-2025"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "ok"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::with_url(
        &server.uri(),
        "sk-ant-test",
        "claude-3-haiku-20240307",
        Duration::from_secs(5),
    )
    .with_beta("preview-2025");
    let response = provider.complete(conversation()).await.unwrap();

    assert_eq!(response.content, "ok");
    assert!(response.usage.is_empty());
}

/// Test Ollama provider with a real local server
#[tokio::test]
#[ignore = "Requires Ollama running locally"]
async fn test_ollama_real_request() {
    let provider = OllamaProvider::new("llama3.2:latest");
    assert!(provider.is_available().await, "Ollama should be available");

    let response = provider
        .ask("What is 2 + 2? Answer with just the number.")
        .await;
    assert!(response.is_ok(), "Request should succeed: {:?}", response);
}

/// Test Anthropic provider with real API
#[tokio::test]
#[ignore = "Requires ANTHROPIC_API_KEY"]
async fn test_anthropic_real_request() {
    let api_key =
        std::env::var("ANTHROPIC_API_KEY").expect("ANTHROPIC_API_KEY must be set for this test");

    let provider = AnthropicProvider::new(&api_key, "claude-3-haiku-20240307");
    let response = provider.ask("Say 'hello' in one word").await;
    assert!(response.is_ok(), "Request should succeed: {:?}", response);

    println!("Anthropic response: {}", response.unwrap());
}
