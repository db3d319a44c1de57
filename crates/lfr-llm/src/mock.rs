//! Mock LLM provider for testing

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::provider::{LlmError, LlmProvider, LlmRequest, LlmResponse, Usage};

/// A mock LLM provider that replays scripted outcomes.
/// Perfect for testing routing decisions without a live backend.
#[derive(Debug)]
pub struct MockProvider {
    /// Name of this mock
    pub name: String,
    /// Scripted outcomes (cycles through them)
    outcomes: Vec<Result<String, LlmError>>,
    /// Fixed usage to report instead of the length-based estimate
    usage: Option<Usage>,
    /// Number of `complete` calls made so far
    calls: AtomicUsize,
    /// Every request received, in order
    requests: Mutex<Vec<LlmRequest>>,
    /// Simulated latency in ms
    latency_ms: u64,
}

impl MockProvider {
    /// Create a mock that cycles through scripted outcomes
    pub fn scripted(outcomes: Vec<Result<String, LlmError>>) -> Self {
        Self {
            name: "mock".to_string(),
            outcomes,
            usage: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            latency_ms: 5,
        }
    }

    /// Create a mock with given responses
    pub fn new(responses: Vec<String>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    /// Create a mock that always returns the same response
    pub fn constant(response: &str) -> Self {
        Self::new(vec![response.to_string()])
    }

    /// Create a mock that always fails with the given error
    pub fn failing(error: LlmError) -> Self {
        Self::scripted(vec![Err(error)])
    }

    /// Create a mock that answers in the `{answer, confidence}` shape
    pub fn confident(answer: &str, confidence: f64) -> Self {
        let body = serde_json::json!({ "answer": answer, "confidence": confidence });
        Self::constant(&body.to_string())
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Number of `complete` calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Copies of every request received
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn estimated_usage(&self, request: &LlmRequest, content: &str) -> Usage {
        if let Some(usage) = self.usage {
            return usage;
        }
        let prompt_chars: usize = request.turns.iter().map(|t| t.text.len()).sum();
        Usage::strict(
            Some((prompt_chars / 4) as u32 + 1),
            Some((content.len() / 4) as u32 + 1),
        )
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        true // Mock is always available
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = Instant::now();
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.requests.lock() {
            guard.push(request.clone());
        }

        // Simulate latency
        tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;

        if self.outcomes.is_empty() {
            return Err(LlmError::Unavailable("mock has no scripted outcomes".to_string()));
        }

        let content = self.outcomes[idx % self.outcomes.len()].clone()?;
        let usage = self.estimated_usage(&request, &content);

        Ok(LlmResponse {
            content,
            model: request.model.clone().unwrap_or_else(|| self.name.clone()),
            usage,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider() {
        let mock = MockProvider::constant("Hello, world!");
        let response = mock.ask("test").await.unwrap();
        assert_eq!(response, "Hello, world!");
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_scripted_outcomes_cycle() {
        let mock = MockProvider::scripted(vec![
            Err(LlmError::Unavailable("down".to_string())),
            Ok("up".to_string()),
        ]);
        assert!(mock.ask("a").await.is_err());
        assert_eq!(mock.ask("b").await.unwrap(), "up");
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_fixed_usage() {
        let usage = Usage::strict(Some(1000), Some(2000));
        let mock = MockProvider::constant("ok").with_usage(usage);
        let response = mock.complete(LlmRequest::simple("hi")).await.unwrap();
        assert_eq!(response.usage.total_tokens, Some(3000));
    }
}
