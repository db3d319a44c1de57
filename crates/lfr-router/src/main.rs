//! Local-first router - standalone HTTP gateway

use std::sync::Arc;

use anyhow::Context;
use lfr_llm::{AnthropicProvider, LlmConfig, LlmProvider, OllamaProvider};
use lfr_router::{AuditLog, Config, Router, Server};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("invalid router configuration")?;
    let llm_config = LlmConfig::from_env().context("invalid provider configuration")?;

    let local: Arc<dyn LlmProvider> =
        Arc::new(OllamaProvider::from_config(&llm_config, &config.local_model));

    let cloud: Option<Arc<dyn LlmProvider>> =
        match AnthropicProvider::from_config(&llm_config, &config.cloud_model) {
            Ok(provider) => Some(Arc::new(provider)),
            Err(e) => {
                warn!(error = %e, "cloud escalation disabled");
                None
            }
        };

    if !local.is_available().await {
        warn!(url = %llm_config.ollama_url, "local backend is not reachable yet");
    }

    let audit = Arc::new(AuditLog::new(config.max_log_rows));
    let engine = Router::builder(local)
        .with_config(&config)
        .maybe_cloud(cloud)
        .audit(audit.clone())
        .build();

    info!(
        local_models = ?config.local_models,
        threshold = config.confidence_threshold,
        "routing engine ready"
    );

    Server::new(config, engine, audit).run().await
}
