//! Anthropic LLM provider (cloud)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::LlmConfig;
use crate::provider::{LlmError, LlmProvider, LlmRequest, LlmResponse, Role, Turn, Usage};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic endpoints in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnthropicTier {
    Messages,
    Complete,
}

impl AnthropicTier {
    const ORDER: [AnthropicTier; 2] = [AnthropicTier::Messages, AnthropicTier::Complete];

    fn path(&self) -> &'static str {
        match self {
            AnthropicTier::Messages => "/v1/messages",
            AnthropicTier::Complete => "/v1/complete",
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<TextBlock<'a>>,
}

#[derive(Debug, Serialize)]
struct TextBlock<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct CompleteRequest<'a> {
    model: &'a str,
    prompt: String,
    temperature: f32,
    max_tokens_to_sample: u32,
    stop_sequences: [&'static str; 1],
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct CompleteResponse {
    #[serde(default)]
    completion: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

/// Split system turns out of the conversation, the way the Messages API wants them.
fn split_system(turns: &[Turn]) -> (Option<String>, Vec<&Turn>) {
    let system: Vec<&str> = turns
        .iter()
        .filter(|t| t.role == Role::System)
        .map(|t| t.text.as_str())
        .collect();
    let rest = turns.iter().filter(|t| t.role != Role::System).collect();
    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (system, rest)
}

/// Render a Human/Assistant transcript for the legacy completion endpoint.
pub fn legacy_prompt(turns: &[Turn]) -> String {
    let (system, rest) = split_system(turns);
    let mut sections: Vec<String> = Vec::new();

    if let Some(system) = system {
        sections.push(format!("\n\nHuman: {}", system.trim()));
        sections.push("\n\nAssistant:".to_string());
    }

    for turn in rest {
        let text = turn.text.trim();
        if text.is_empty() {
            continue;
        }
        match turn.role {
            Role::Assistant => sections.push(format!("\n\nAssistant: {}", text)),
            _ => sections.push(format!("\n\nHuman: {}", text)),
        }
    }

    let open = sections
        .last()
        .map(|s| s.starts_with("\n\nAssistant:"))
        .unwrap_or(false);
    if !open {
        sections.push("\n\nAssistant:".to_string());
    }

    sections.concat()
}

/// Anthropic provider
#[derive(Debug)]
pub struct AnthropicProvider {
    /// API key
    api_key: String,
    /// Model to use when the request does not name one
    model: String,
    /// Optional `anthropic-beta` header value
    beta: Option<String>,
    /// HTTP client
    client: reqwest::Client,
    /// Base URL
    base_url: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::with_url("https://api.anthropic.com", api_key, model, Duration::from_secs(90))
    }

    /// Create with custom base URL and request timeout
    pub fn with_url(base_url: &str, api_key: &str, model: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            beta: None,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create from loaded configuration; fails when no API key is set
    pub fn from_config(config: &LlmConfig, model: &str) -> Result<Self, LlmError> {
        let api_key = config.anthropic_api_key.as_deref().ok_or_else(|| {
            LlmError::NotConfigured("ANTHROPIC_API_KEY is not set".to_string())
        })?;
        let mut provider =
            Self::with_url(&config.anthropic_url, api_key, model, config.cloud_timeout);
        provider.beta = config.anthropic_beta.clone();
        Ok(provider)
    }

    pub fn with_beta(mut self, beta: &str) -> Self {
        self.beta = Some(beta.to_string());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn post(&self, tier: AnthropicTier) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(format!("{}{}", self.base_url, tier.path()))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        if let Some(beta) = &self.beta {
            builder = builder.header("anthropic-beta", beta);
        }
        builder
    }

    async fn call_tier(
        &self,
        tier: AnthropicTier,
        request: &LlmRequest,
        model: &str,
    ) -> Result<(String, Option<String>, ApiUsage), LlmError> {
        let temperature = request.temperature.unwrap_or(0.2);
        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        let builder = match tier {
            AnthropicTier::Messages => {
                let (system, rest) = split_system(&request.turns);
                self.post(tier).json(&MessagesRequest {
                    model,
                    messages: rest
                        .into_iter()
                        .map(|turn| Message {
                            role: match turn.role {
                                Role::Assistant => "assistant",
                                _ => "user",
                            },
                            content: vec![TextBlock {
                                kind: "text",
                                text: &turn.text,
                            }],
                        })
                        .collect(),
                    temperature,
                    max_tokens,
                    system,
                })
            }
            AnthropicTier::Complete => self.post(tier).json(&CompleteRequest {
                model,
                prompt: legacy_prompt(&request.turns),
                temperature,
                max_tokens_to_sample: max_tokens,
                stop_sequences: ["\n\nHuman:"],
            }),
        };

        let response = builder.send().await.map_err(LlmError::from_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, &body));
        }

        match tier {
            AnthropicTier::Messages => {
                let api: MessagesResponse = response
                    .json()
                    .await
                    .map_err(|e| LlmError::Protocol(e.to_string()))?;
                let text = api
                    .content
                    .iter()
                    .filter(|b| b.kind == "text" && !b.text.is_empty())
                    .map(|b| b.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok((text.trim().to_string(), api.model, api.usage.unwrap_or_default()))
            }
            AnthropicTier::Complete => {
                let api: CompleteResponse = response
                    .json()
                    .await
                    .map_err(|e| LlmError::Protocol(e.to_string()))?;
                Ok((
                    api.completion.trim().to_string(),
                    api.model,
                    api.usage.unwrap_or_default(),
                ))
            }
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = Instant::now();
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());

        for tier in AnthropicTier::ORDER {
            match self.call_tier(tier, &request, &model).await {
                Ok((content, reported_model, usage)) => {
                    return Ok(LlmResponse {
                        content,
                        model: reported_model.unwrap_or(model),
                        usage: Usage::lenient(usage.input_tokens, usage.output_tokens),
                        latency_ms: start.elapsed().as_millis() as u64,
                    });
                }
                Err(err) if err.is_unsupported() => {
                    tracing::debug!(endpoint = tier.path(), "Anthropic endpoint not supported");
                }
                Err(err) => return Err(err),
            }
        }

        Err(LlmError::Protocol(
            "Anthropic API returned 404 for both Messages and Complete endpoints. \
             If you're using a preview model, set ANTHROPIC_BETA with the required beta flag."
                .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_system_joins_system_turns() {
        let turns = vec![
            Turn::system("one"),
            Turn::user("hi"),
            Turn::system("two"),
        ];
        let (system, rest) = split_system(&turns);
        assert_eq!(system.as_deref(), Some("one\n\ntwo"));
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn test_legacy_prompt_shape() {
        let turns = vec![
            Turn::system("Be brief"),
            Turn::user("Hi"),
            Turn::assistant(""),
        ];
        assert_eq!(
            legacy_prompt(&turns),
            "\n\nHuman: Be brief\n\nAssistant:\n\nHuman: Hi\n\nAssistant:"
        );
    }

    #[test]
    fn test_from_config_requires_key() {
        let err = AnthropicProvider::from_config(&LlmConfig::default(), "claude-3-haiku-20240307")
            .unwrap_err();
        assert!(matches!(err, LlmError::NotConfigured(_)));
    }
}
