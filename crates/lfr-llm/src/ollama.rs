//! Ollama LLM provider for local inference
//!
//! Talks to `/api/chat` first. Older Ollama servers answer 404 there, in which
//! case the conversation is flattened into a transcript and sent to
//! `/api/generate` instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::LlmConfig;
use crate::provider::{LlmError, LlmProvider, LlmRequest, LlmResponse, Turn, Usage};

/// Ollama endpoints in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OllamaTier {
    Chat,
    Generate,
}

impl OllamaTier {
    const ORDER: [OllamaTier; 2] = [OllamaTier::Chat, OllamaTier::Generate];

    fn path(&self) -> &'static str {
        match self {
            OllamaTier::Chat => "/api/chat",
            OllamaTier::Generate => "/api/generate",
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl OllamaOptions {
    fn from_request(request: &LlmRequest) -> Option<Self> {
        if request.temperature.is_none() && request.max_tokens.is_none() {
            return None;
        }
        Some(Self {
            temperature: request.temperature,
            num_predict: request.max_tokens,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatApiResponse {
    #[serde(default)]
    message: Option<ChatApiMessage>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatApiMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct GenerateApiResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

/// Text, model name and counters from whichever tier answered
struct TierOutput {
    content: String,
    model: Option<String>,
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

/// Render turns as a plain transcript ending in an open assistant turn.
pub fn transcript_prompt(turns: &[Turn]) -> String {
    let mut lines: Vec<String> = turns
        .iter()
        .map(|turn| format!("{}: {}", turn.role.label(), turn.text))
        .collect();
    lines.push("Assistant:".to_string());
    lines.join("\n\n")
}

/// Ollama provider for local LLM inference
#[derive(Debug)]
pub struct OllamaProvider {
    /// Base URL for Ollama API
    base_url: String,
    /// Model to use when the request does not name one
    model: String,
    /// HTTP client
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a new Ollama provider with default settings
    pub fn new(model: &str) -> Self {
        Self::with_url("http://localhost:11434", model)
    }

    /// Create with custom base URL
    pub fn with_url(base_url: &str, model: &str) -> Self {
        Self::with_timeout(base_url, model, Duration::from_secs(120))
    }

    /// Create with custom base URL and request timeout
    pub fn with_timeout(base_url: &str, model: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        }
    }

    /// Create from loaded configuration
    pub fn from_config(config: &LlmConfig, model: &str) -> Self {
        Self::with_timeout(&config.ollama_url, model, config.local_timeout)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call_tier(
        &self,
        tier: OllamaTier,
        request: &LlmRequest,
        model: &str,
    ) -> Result<TierOutput, LlmError> {
        let url = format!("{}{}", self.base_url, tier.path());
        let options = OllamaOptions::from_request(request);

        let builder = match tier {
            OllamaTier::Chat => self.client.post(&url).json(&ChatRequest {
                model,
                messages: request
                    .turns
                    .iter()
                    .map(|turn| ChatMessage {
                        role: turn.role.as_str(),
                        content: &turn.text,
                    })
                    .collect(),
                stream: false,
                options,
            }),
            OllamaTier::Generate => self.client.post(&url).json(&GenerateRequest {
                model,
                prompt: transcript_prompt(&request.turns),
                stream: false,
                options,
            }),
        };

        let response = builder.send().await.map_err(LlmError::from_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, &body));
        }

        match tier {
            OllamaTier::Chat => {
                let api: ChatApiResponse = response
                    .json()
                    .await
                    .map_err(|e| LlmError::Protocol(e.to_string()))?;
                Ok(TierOutput {
                    content: api.message.map(|m| m.content).unwrap_or_default(),
                    model: api.model,
                    prompt_tokens: api.prompt_eval_count,
                    completion_tokens: api.eval_count,
                })
            }
            OllamaTier::Generate => {
                let api: GenerateApiResponse = response
                    .json()
                    .await
                    .map_err(|e| LlmError::Protocol(e.to_string()))?;
                Ok(TierOutput {
                    content: api.response,
                    model: api.model,
                    prompt_tokens: api.prompt_eval_count,
                    completion_tokens: api.eval_count,
                })
            }
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        self.client.get(&url).send().await.is_ok()
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = Instant::now();
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());

        for tier in OllamaTier::ORDER {
            match self.call_tier(tier, &request, &model).await {
                Ok(output) => {
                    return Ok(LlmResponse {
                        content: output.content,
                        model: output.model.unwrap_or(model),
                        usage: Usage::strict(output.prompt_tokens, output.completion_tokens),
                        latency_ms: start.elapsed().as_millis() as u64,
                    });
                }
                Err(err) if err.is_unsupported() => {
                    tracing::debug!(endpoint = tier.path(), "Ollama endpoint not supported");
                }
                Err(err) => return Err(err),
            }
        }

        Err(LlmError::Protocol(format!(
            "Ollama at {} returned 404 for both /api/chat and /api/generate",
            self.base_url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_ends_with_assistant_marker() {
        let prompt = transcript_prompt(&[Turn::system("Be brief"), Turn::user("Hi")]);
        assert_eq!(prompt, "System: Be brief\n\nUser: Hi\n\nAssistant:");
    }

    #[test]
    fn test_options_omitted_when_unset() {
        let request = LlmRequest::simple("hi");
        assert!(OllamaOptions::from_request(&request).is_none());

        let request = LlmRequest::simple("hi").with_temperature(0.2);
        let options = OllamaOptions::from_request(&request).unwrap();
        let json = serde_json::to_value(options).unwrap();
        assert_eq!(json, serde_json::json!({"temperature": 0.2f32}));
    }

    #[tokio::test]
    #[ignore] // Requires Ollama running locally
    async fn test_ollama_available() {
        let provider = OllamaProvider::new("llama3.2:latest");
        if provider.is_available().await {
            let response = provider.ask("Say hello in one word").await.unwrap();
            assert!(!response.is_empty());
        }
    }
}
