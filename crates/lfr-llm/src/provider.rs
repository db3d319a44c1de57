//! LLM Provider trait and common types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from LLM providers
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LlmError {
    /// Transport failure: connection refused, timeout, or a non-success status
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
    /// The endpoint does not exist on this server (HTTP 404)
    #[error("Endpoint not supported: {0}")]
    Unsupported(String),
    /// The upstream answered, but its shape could not be normalized
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// The provider is missing a credential or endpoint
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl LlmError {
    /// True for the failure class that advances a provider to its legacy endpoint.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, LlmError::Unsupported(_))
    }

    /// Map a non-success HTTP status to the matching error class.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        if status == reqwest::StatusCode::NOT_FOUND {
            LlmError::Unsupported(format!("Status: {}", status))
        } else {
            LlmError::Unavailable(format!("Status: {}, Body: {}", status, body))
        }
    }

    /// Map a reqwest transport error.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Unavailable(format!("timed out: {}", err))
        } else {
            LlmError::Unavailable(err.to_string())
        }
    }
}

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Label used in hand-assembled transcripts ("User: ...").
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    /// Optional image payload (base64 or URL); never sent to a provider directly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            image: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

/// Token usage reported by a provider.
///
/// Counters the upstream omitted stay `None`; they are never coerced to zero here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl Usage {
    /// Total is only set when both sides are known.
    pub fn strict(prompt_tokens: Option<u32>, completion_tokens: Option<u32>) -> Self {
        let total_tokens = match (prompt_tokens, completion_tokens) {
            (Some(p), Some(c)) => Some(p.saturating_add(c)),
            _ => None,
        };
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }

    /// Total is set when at least one side is known, counting the other as zero.
    pub fn lenient(prompt_tokens: Option<u32>, completion_tokens: Option<u32>) -> Self {
        let total_tokens = match (prompt_tokens, completion_tokens) {
            (None, None) => None,
            (p, c) => Some(p.unwrap_or(0).saturating_add(c.unwrap_or(0))),
        };
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none() && self.completion_tokens.is_none()
    }
}

/// A request to an LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    /// Ordered conversation turns
    pub turns: Vec<Turn>,
    /// Temperature (0.0 = deterministic, 1.0 = creative)
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Model override; the provider's configured model when absent
    pub model: Option<String>,
}

impl LlmRequest {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns,
            temperature: None,
            max_tokens: None,
            model: None,
        }
    }

    /// Create a simple single-question request
    pub fn simple(prompt: &str) -> Self {
        Self::new(vec![Turn::user(prompt)])
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Response from an LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    /// The generated text
    pub content: String,
    /// Model used
    pub model: String,
    /// Normalized token counters
    pub usage: Usage,
    /// Time taken in milliseconds
    pub latency_ms: u64,
}

/// Trait for LLM providers.
///
/// One call is one round trip: implementations never retry. An implementation
/// may try a legacy endpoint after an [`LlmError::Unsupported`] failure, and
/// must propagate every other failure unchanged.
#[async_trait]
pub trait LlmProvider: Send + Sync + std::fmt::Debug {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Check if the provider is available
    async fn is_available(&self) -> bool;

    /// Generate a completion
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Generate with a simple prompt (convenience method)
    async fn ask(&self, prompt: &str) -> Result<String, LlmError> {
        let response = self.complete(LlmRequest::simple(prompt)).await?;
        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_usage_needs_both_sides() {
        let usage = Usage::strict(Some(10), None);
        assert_eq!(usage.prompt_tokens, Some(10));
        assert_eq!(usage.completion_tokens, None);
        assert_eq!(usage.total_tokens, None);

        assert_eq!(Usage::strict(Some(10), Some(5)).total_tokens, Some(15));
    }

    #[test]
    fn test_lenient_usage_needs_one_side() {
        assert_eq!(Usage::lenient(None, Some(7)).total_tokens, Some(7));
        assert_eq!(Usage::lenient(None, None).total_tokens, None);
        assert!(Usage::lenient(None, None).is_empty());
    }

    #[test]
    fn test_status_classification() {
        let err = LlmError::from_status(reqwest::StatusCode::NOT_FOUND, "");
        assert!(err.is_unsupported());

        let err = LlmError::from_status(reqwest::StatusCode::BAD_GATEWAY, "upstream");
        assert!(matches!(err, LlmError::Unavailable(_)));
    }

    #[test]
    fn test_turn_serializes_lowercase_role() {
        let json = serde_json::to_value(Turn::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("image").is_none());
    }
}
