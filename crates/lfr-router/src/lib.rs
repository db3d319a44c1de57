//! LFR Router - local-first routing between a local and a cloud LLM
//!
//! Every conversation is answered by the local backend first. The local model
//! reports a confidence alongside its answer; below the threshold the router
//! escalates to the cloud backend, unless the conversation carries the opt-out
//! marker or no cloud credential is configured. Identical conversations are
//! served from a fingerprint cache until their TTL runs out.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use lfr_llm::{MockProvider, Turn};
//! use lfr_router::{ChatRequest, Route, Router};
//!
//! #[tokio::main]
//! async fn main() {
//!     let local = Arc::new(MockProvider::confident("4", 0.92));
//!     let router = Router::builder(local).confidence_threshold(0.7).build();
//!
//!     let decision = router
//!         .route(ChatRequest::new(vec![Turn::user("What is 2+2?")]))
//!         .await
//!         .unwrap();
//!     assert_eq!(decision.route, Route::Local);
//!     assert_eq!(decision.answer, "4");
//! }
//! ```
//!
//! With the `standalone` feature the crate also ships an OpenAI-style HTTP
//! gateway and the `lfr-router` binary.

pub mod audit;
pub mod augment;
pub mod cache;
pub mod config;
pub mod cost;
pub mod extract;
pub mod models;
pub mod policy;
pub mod router;

pub use audit::{AuditLog, AuditRecord, AuditSink, AuditSummary, NoopSink};
pub use augment::{
    AugmentationPipeline, Augmenter, ContextBlock, ImageTextAugmenter, ImageTextReader, Placement,
    SearchAugmenter, SnippetSource,
};
pub use cache::{Fingerprint, FingerprintCache};
pub use config::Config;
pub use cost::PriceTable;
pub use extract::{extract, Extraction, ExtractionStrategy, Extractor};
pub use models::{ModelCatalog, ModelSelection, Resolution};
pub use policy::{PolicyGate, PolicyResult};
pub use router::{
    ChatRequest, Route, Router, RouterBuilder, RouterConfig, RouterError, RoutingDecision,
    APOLOGY,
};

pub use lfr_llm::{LlmError, LlmProvider, LlmRequest, LlmResponse, Turn, Usage};

#[cfg(feature = "standalone")]
pub mod gateway;

#[cfg(feature = "standalone")]
pub use gateway::Server;
