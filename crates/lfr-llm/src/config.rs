//! Provider configuration
//!
//! Handles endpoints, credentials and timeouts for the local and cloud backends.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama base URL (env: OLLAMA_BASE, default: http://localhost:11434)
    pub ollama_url: String,
    /// Local request timeout (env: LOCAL_TIMEOUT_SECS)
    pub local_timeout: Duration,
    /// Anthropic base URL (env: ANTHROPIC_BASE)
    pub anthropic_url: String,
    /// Anthropic API key (env: ANTHROPIC_API_KEY)
    pub anthropic_api_key: Option<String>,
    /// Optional beta flag header (env: ANTHROPIC_BETA)
    pub anthropic_beta: Option<String>,
    /// Cloud request timeout (env: CLOUD_TIMEOUT_SECS)
    pub cloud_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            local_timeout: Duration::from_secs(120),
            anthropic_url: "https://api.anthropic.com".to_string(),
            anthropic_api_key: None,
            anthropic_beta: None,
            cloud_timeout: Duration::from_secs(90),
        }
    }
}

impl LlmConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            ollama_url: env::var("OLLAMA_BASE").unwrap_or(defaults.ollama_url),
            local_timeout: secs_var("LOCAL_TIMEOUT_SECS")?.unwrap_or(defaults.local_timeout),
            anthropic_url: env::var("ANTHROPIC_BASE").unwrap_or(defaults.anthropic_url),
            anthropic_api_key: non_empty_var("ANTHROPIC_API_KEY"),
            anthropic_beta: non_empty_var("ANTHROPIC_BETA"),
            cloud_timeout: secs_var("CLOUD_TIMEOUT_SECS")?.unwrap_or(defaults.cloud_timeout),
        })
    }

    /// Check if a provider is configured
    pub fn is_configured(&self, provider: &str) -> bool {
        match provider.to_lowercase().as_str() {
            "anthropic" => self.anthropic_api_key.is_some(),
            "ollama" | "mock" => true,
            _ => false,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn secs_var(name: &str) -> Result<Option<Duration>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ConfigError::Invalid(format!("{} must be whole seconds, got {:?}", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LlmConfig::default();
        assert_eq!(config.ollama_url, "http://localhost:11434");
        assert_eq!(config.cloud_timeout, Duration::from_secs(90));
        assert!(config.is_configured("ollama"));
        assert!(!config.is_configured("anthropic"));
    }

    #[test]
    fn test_anthropic_configured_with_key() {
        let config = LlmConfig {
            anthropic_api_key: Some("sk-ant-test".to_string()),
            ..LlmConfig::default()
        };
        assert!(config.is_configured("Anthropic"));
    }
}
