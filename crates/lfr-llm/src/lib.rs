//! # LFR LLM
//!
//! Provider adapters for the local-first router.
//!
//! ## Supported Backends
//!
//! | Provider | Type | Key Required | Legacy fallback |
//! |----------|------|--------------|-----------------|
//! | Ollama | Local | None | `/api/chat` → `/api/generate` |
//! | Anthropic | Cloud | `ANTHROPIC_API_KEY` | `/v1/messages` → `/v1/complete` |
//! | Mock | Testing | None | - |
//!
//! Every adapter makes exactly one attempt per endpoint. The legacy endpoint
//! is only tried when the modern one answers 404.
//!
//! ## Quick Start
//!
//! ```rust
//! use lfr_llm::{LlmProvider, MockProvider};
//!
//! #[tokio::main]
//! async fn main() {
//!     let llm = MockProvider::constant("Paris");
//!     let response = llm.ask("Capital of France?").await.unwrap();
//!     assert_eq!(response, "Paris");
//! }
//! ```
//!
//! ## With Ollama
//!
//! ```rust,ignore
//! use lfr_llm::{LlmConfig, OllamaProvider};
//!
//! let config = LlmConfig::from_env()?;
//! let llm = OllamaProvider::from_config(&config, "llama3.2:latest");
//! let response = llm.ask("Explain Merkle trees").await?;
//! ```

pub mod anthropic;
pub mod config;
pub mod mock;
pub mod ollama;
pub mod provider;

pub use anthropic::AnthropicProvider;
pub use config::{ConfigError, LlmConfig};
pub use mock::MockProvider;
pub use ollama::OllamaProvider;
pub use provider::{LlmError, LlmProvider, LlmRequest, LlmResponse, Role, Turn, Usage};
