//! Router - confidence-gated routing between the local and cloud backends
//!
//! Per request:
//!
//! ```text
//! CacheCheck -> LocalAttempt -> ConfidenceGate -> {Done | CloudFallback} -> Finalize
//!            \-> ForcedCloud ------------------------------------------/
//! ```
//!
//! A local transport failure escalates whenever the cloud is configured and
//! the policy allows it. A low-confidence local answer escalates under the
//! same conditions, but a failed escalation keeps the local answer instead of
//! failing the request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lfr_llm::{LlmError, LlmProvider, LlmRequest, LlmResponse, Turn, Usage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audit::{AuditRecord, AuditSink, NoopSink};
use crate::augment::{AugmentationPipeline, Augmenter};
use crate::cache::{Fingerprint, FingerprintCache};
use crate::config::Config;
use crate::cost::{round6, PriceTable};
use crate::extract::Extractor;
use crate::models::{ModelCatalog, ModelSelection, Resolution};
use crate::policy::PolicyGate;

/// Instruction turn prepended to every local call
pub const CONFIDENCE_INSTRUCTION: &str = "You are an expert assistant.\n\
\n\
OUTPUT FORMAT (MANDATORY):\n\
Respond ONLY with a JSON object in this exact schema:\n\
{\n  \"answer\": \"...\",\n  \"confidence\": <number between 0 and 1>\n}\n\
\n\
RULES FOR JSON OUTPUT:\n\
- Never include explanations outside the JSON.\n\
- Always fill both fields.\n\
\n\
CONTEXT:\n\
- If search results or extracted image text are provided in the conversation, base your answer on them.\n\
- Leverage earlier conversation context when relevant.\n\
- Do not mention the JSON format inside the answer.\n\
\n\
MATH FORMATTING:\n\
- Inline math: $expression$\n\
- Display math: $$expression$$\n\
\n\
CONFIDENCE FIELD:\n\
- \"confidence\" is your estimated probability that a domain expert would judge your answer correct.\n\
- Use lower confidence when guessing or when the question is ambiguous.\n";

/// Returned instead of an empty answer
pub const APOLOGY: &str =
    "I apologize, but I couldn't generate a proper response. Please try rephrasing your question.";

/// Which backend produced the final answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Local,
    Cloud,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Local => "local",
            Route::Cloud => "cloud",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound conversation to route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub conversation: Vec<Turn>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    pub fn new(conversation: Vec<Turn>) -> Self {
        Self {
            conversation,
            model: None,
            temperature: None,
            conversation_id: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }
}

/// The routed response. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub id: String,
    pub conversation_id: String,
    pub fingerprint: Fingerprint,
    pub route: Route,
    pub answer: String,
    pub confidence: f64,
    /// Cloud model on the cloud route, else the resolved local model
    pub model: String,
    /// Resolved local model; absent when the caller forced the cloud
    pub local_model: Option<String>,
    pub latency_ms: u64,
    pub usage: Usage,
    pub estimated_cost_usd: f64,
    pub estimated_cost_saved_usd: f64,
    /// Augmenters that contributed context
    pub augmentations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

fn cloud_suffix(cloud: &Option<String>) -> String {
    match cloud {
        Some(err) => format!("; cloud fallback failed: {}", err),
        None => String::new(),
    }
}

/// Terminal routing failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RouterError {
    /// Local call failed and no cloud fallback was permitted or it failed too
    #[error("Local model unavailable: {local}{}", cloud_suffix(.cloud))]
    LocalUnavailable {
        local: String,
        cloud: Option<String>,
    },
    /// The caller forced the cloud and the cloud call failed
    #[error("Cloud model unavailable: {0}")]
    CloudUnavailable(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RouterError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            RouterError::LocalUnavailable { .. } => "local_unavailable",
            RouterError::CloudUnavailable(_) => "cloud_unavailable",
            RouterError::Configuration(_) => "configuration_error",
        }
    }
}

/// Tunables of the routing engine
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub confidence_threshold: f64,
    pub cache_ttl: Duration,
    pub local_temperature: f32,
    pub local_max_tokens: Option<u32>,
    pub cloud_max_tokens: u32,
    pub prices: PriceTable,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            cache_ttl: Duration::from_secs(300),
            local_temperature: 0.7,
            local_max_tokens: None,
            cloud_max_tokens: 1024,
            prices: PriceTable::default(),
        }
    }
}

/// Answer chosen before finalization
struct Outcome {
    route: Route,
    answer: String,
    confidence: f64,
    latency_ms: u64,
    usage: Usage,
}

impl Outcome {
    fn cloud(response: LlmResponse, latency_ms: u64) -> Self {
        Self {
            route: Route::Cloud,
            answer: response.content,
            confidence: 1.0,
            latency_ms,
            usage: response.usage,
        }
    }
}

/// The routing engine. Shared across requests behind an `Arc`.
pub struct Router {
    local: Arc<dyn LlmProvider>,
    cloud: Option<Arc<dyn LlmProvider>>,
    catalog: ModelCatalog,
    policy: PolicyGate,
    extractor: Extractor,
    cache: Arc<FingerprintCache<RoutingDecision>>,
    augmentation: AugmentationPipeline,
    audit: Arc<dyn AuditSink>,
    config: RouterConfig,
}

impl Router {
    pub fn builder(local: Arc<dyn LlmProvider>) -> RouterBuilder {
        RouterBuilder::new(local)
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &FingerprintCache<RoutingDecision> {
        &self.cache
    }

    pub fn cloud_configured(&self) -> bool {
        self.cloud.is_some()
    }

    /// Route one conversation to a single answer
    pub async fn route(&self, request: ChatRequest) -> Result<RoutingDecision, RouterError> {
        let resolution = self.catalog.resolve(request.model.as_deref());
        let fingerprint = Fingerprint::compute(&request.conversation, &resolution.routing_hint);
        let conversation_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| fingerprint.to_string());

        if let Some(mut cached) = self.cache.get(&fingerprint, self.config.cache_ttl) {
            debug!(fingerprint = %fingerprint, route = %cached.route, "cache hit");
            metrics::counter!("lfr_cache_hits_total").increment(1);
            cached.conversation_id = conversation_id;
            return Ok(cached);
        }

        let cloud_allowed = self.policy.cloud_allowed(&request.conversation);
        let augmented = self.augmentation.run(&request.conversation).await;
        let temperature = request.temperature.unwrap_or(self.config.local_temperature);

        let outcome = match &resolution.selection {
            ModelSelection::ForcedCloud => self.forced_cloud(&augmented.turns, temperature).await?,
            ModelSelection::Local(model) => {
                self.local_first(model, &augmented.turns, temperature, cloud_allowed)
                    .await?
            }
        };

        let decision = self.finalize(
            outcome,
            &resolution,
            fingerprint,
            conversation_id,
            augmented.applied,
        );

        self.cache.put(decision.fingerprint.clone(), decision.clone());
        self.audit.record(self.audit_record(&request, &resolution, &decision));

        metrics::counter!("lfr_requests_total", "route" => decision.route.as_str()).increment(1);
        metrics::histogram!("lfr_route_latency_ms", "route" => decision.route.as_str())
            .record(decision.latency_ms as f64);

        info!(
            id = %decision.id,
            route = %decision.route,
            model = %decision.model,
            confidence = decision.confidence,
            latency_ms = decision.latency_ms,
            "request routed"
        );

        Ok(decision)
    }

    async fn forced_cloud(&self, turns: &[Turn], temperature: f32) -> Result<Outcome, RouterError> {
        if self.cloud.is_none() {
            return Err(RouterError::Configuration(
                "cloud model requested but no cloud credential is configured".to_string(),
            ));
        }

        let (response, latency_ms) = self
            .call_cloud(turns, temperature)
            .await
            .map_err(|e| RouterError::CloudUnavailable(e.to_string()))?;

        Ok(Outcome::cloud(response, latency_ms))
    }

    async fn local_first(
        &self,
        model: &str,
        turns: &[Turn],
        temperature: f32,
        cloud_allowed: bool,
    ) -> Result<Outcome, RouterError> {
        let can_escalate = cloud_allowed && self.cloud.is_some();

        let (response, latency_ms) = match self.call_local(model, turns, temperature).await {
            Ok(ok) => ok,
            Err(local_err) => {
                warn!(model, error = %local_err, can_escalate, "local call failed");
                if !can_escalate {
                    return Err(RouterError::LocalUnavailable {
                        local: local_err.to_string(),
                        cloud: None,
                    });
                }

                return match self.call_cloud(turns, temperature).await {
                    Ok((response, latency_ms)) => {
                        metrics::counter!("lfr_escalations_total", "outcome" => "transport_fallback")
                            .increment(1);
                        Ok(Outcome::cloud(response, latency_ms))
                    }
                    Err(cloud_err) => {
                        metrics::counter!("lfr_escalations_total", "outcome" => "failed").increment(1);
                        Err(RouterError::LocalUnavailable {
                            local: local_err.to_string(),
                            cloud: Some(cloud_err.to_string()),
                        })
                    }
                };
            }
        };

        let extraction = self.extractor.extract(&response.content);
        debug!(
            strategy = %extraction.strategy,
            confidence = extraction.confidence,
            "local answer extracted"
        );

        let local = Outcome {
            route: Route::Local,
            answer: extraction.answer,
            confidence: extraction.confidence,
            latency_ms,
            usage: response.usage,
        };

        if local.confidence >= self.config.confidence_threshold || !can_escalate {
            return Ok(local);
        }

        match self.call_cloud(turns, temperature).await {
            Ok((response, latency_ms)) => {
                metrics::counter!("lfr_escalations_total", "outcome" => "accepted").increment(1);
                Ok(Outcome::cloud(response, latency_ms))
            }
            Err(e) => {
                metrics::counter!("lfr_escalations_total", "outcome" => "kept_local").increment(1);
                warn!(
                    error = %e,
                    confidence = local.confidence,
                    "escalation failed, keeping local answer"
                );
                Ok(local)
            }
        }
    }

    async fn call_local(
        &self,
        model: &str,
        turns: &[Turn],
        temperature: f32,
    ) -> Result<(LlmResponse, u64), LlmError> {
        let mut with_instruction = Vec::with_capacity(turns.len() + 1);
        with_instruction.push(Turn::system(CONFIDENCE_INSTRUCTION));
        with_instruction.extend_from_slice(turns);

        let request = LlmRequest::new(with_instruction)
            .with_model(model)
            .with_temperature(temperature)
            .with_max_tokens(self.config.local_max_tokens);

        let start = Instant::now();
        let response = self.local.complete(request).await?;
        Ok((response, start.elapsed().as_millis() as u64))
    }

    async fn call_cloud(
        &self,
        turns: &[Turn],
        temperature: f32,
    ) -> Result<(LlmResponse, u64), LlmError> {
        let cloud = self
            .cloud
            .as_ref()
            .ok_or_else(|| LlmError::NotConfigured("no cloud provider".to_string()))?;

        let request = LlmRequest::new(turns.to_vec())
            .with_model(self.catalog.cloud_model())
            .with_temperature(temperature)
            .with_max_tokens(Some(self.config.cloud_max_tokens));

        let start = Instant::now();
        let response = cloud.complete(request).await?;
        Ok((response, start.elapsed().as_millis() as u64))
    }

    fn finalize(
        &self,
        outcome: Outcome,
        resolution: &Resolution,
        fingerprint: Fingerprint,
        conversation_id: String,
        augmentations: Vec<String>,
    ) -> RoutingDecision {
        let (answer, confidence) = if outcome.answer.trim().is_empty() {
            (APOLOGY.to_string(), 0.0)
        } else {
            (outcome.answer, outcome.confidence)
        };

        let priced = self.config.prices.estimate(&outcome.usage);
        let (cost, saved) = match outcome.route {
            Route::Cloud => (priced, 0.0),
            Route::Local => (0.0, priced),
        };

        let local_model = resolution.selection.local_model().map(str::to_string);
        let model = match (outcome.route, &local_model) {
            (Route::Local, Some(m)) => m.clone(),
            _ => self.catalog.cloud_model().to_string(),
        };

        RoutingDecision {
            id: short_id(),
            conversation_id,
            fingerprint,
            route: outcome.route,
            answer,
            confidence,
            model,
            local_model,
            latency_ms: outcome.latency_ms,
            usage: outcome.usage,
            estimated_cost_usd: round6(cost),
            estimated_cost_saved_usd: round6(saved),
            augmentations,
            created_at: Utc::now(),
        }
    }

    fn audit_record(
        &self,
        request: &ChatRequest,
        resolution: &Resolution,
        decision: &RoutingDecision,
    ) -> AuditRecord {
        let request_json = serde_json::json!({
            "conversation_id": decision.conversation_id,
            "turns": request.conversation,
            "requested_model": request.model,
            "selected_local_model": resolution.selection.local_model(),
            "forced_cloud": resolution.selection.is_forced_cloud(),
        });

        AuditRecord {
            id: decision.id.clone(),
            route: decision.route,
            fingerprint: decision.fingerprint.clone(),
            confidence: decision.confidence,
            latency_ms: decision.latency_ms,
            estimated_cost_usd: decision.estimated_cost_usd,
            estimated_cost_saved_usd: decision.estimated_cost_saved_usd,
            request: request_json,
            response: serde_json::to_value(decision).unwrap_or(serde_json::Value::Null),
            created_at: decision.created_at,
        }
    }
}

fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("local", &self.local.name())
            .field("cloud", &self.cloud.as_ref().map(|c| c.name().to_string()))
            .field("catalog", &self.catalog)
            .field("policy", &self.policy)
            .field("augmentation", &self.augmentation)
            .field("config", &self.config)
            .finish()
    }
}

/// Builder for Router
pub struct RouterBuilder {
    local: Arc<dyn LlmProvider>,
    cloud: Option<Arc<dyn LlmProvider>>,
    catalog: Option<ModelCatalog>,
    policy: PolicyGate,
    cache: Option<Arc<FingerprintCache<RoutingDecision>>>,
    augmentation: AugmentationPipeline,
    audit: Arc<dyn AuditSink>,
    config: RouterConfig,
}

impl RouterBuilder {
    pub fn new(local: Arc<dyn LlmProvider>) -> Self {
        Self {
            local,
            cloud: None,
            catalog: None,
            policy: PolicyGate::default(),
            cache: None,
            augmentation: AugmentationPipeline::new(),
            audit: Arc::new(NoopSink),
            config: RouterConfig::default(),
        }
    }

    /// Apply every setting from a loaded [`Config`]
    pub fn with_config(mut self, config: &Config) -> Self {
        self.catalog = Some(ModelCatalog::new(
            config.local_models.clone(),
            &config.local_model,
            &config.cloud_model,
        ));
        self.policy = PolicyGate::with_marker(&config.opt_out_marker);
        self.cache = Some(Arc::new(match config.cache_max_entries {
            Some(max) => FingerprintCache::bounded(max),
            None => FingerprintCache::new(),
        }));
        self.config = RouterConfig {
            confidence_threshold: config.confidence_threshold,
            cache_ttl: config.cache_ttl,
            local_temperature: config.local_temperature,
            local_max_tokens: config.local_max_tokens,
            cloud_max_tokens: config.cloud_max_tokens,
            prices: config.prices,
        };
        self
    }

    pub fn cloud(mut self, cloud: Arc<dyn LlmProvider>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    pub fn maybe_cloud(mut self, cloud: Option<Arc<dyn LlmProvider>>) -> Self {
        self.cloud = cloud;
        self
    }

    pub fn catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn policy(mut self, policy: PolicyGate) -> Self {
        self.policy = policy;
        self
    }

    pub fn cache(mut self, cache: Arc<FingerprintCache<RoutingDecision>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn augmenter(mut self, augmenter: Arc<dyn Augmenter>) -> Self {
        self.augmentation = self.augmentation.with(augmenter);
        self
    }

    pub fn audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn confidence_threshold(mut self, threshold: f64) -> Self {
        self.config.confidence_threshold = threshold;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    pub fn local_temperature(mut self, temperature: f32) -> Self {
        self.config.local_temperature = temperature;
        self
    }

    pub fn prices(mut self, prices: PriceTable) -> Self {
        self.config.prices = prices;
        self
    }

    pub fn build(self) -> Router {
        let defaults = Config::default();
        let catalog = self.catalog.unwrap_or_else(|| {
            ModelCatalog::new(
                defaults.local_models.clone(),
                &defaults.local_model,
                &defaults.cloud_model,
            )
        });

        Router {
            local: self.local,
            cloud: self.cloud,
            catalog,
            policy: self.policy,
            extractor: Extractor::default(),
            cache: self.cache.unwrap_or_default(),
            augmentation: self.augmentation,
            audit: self.audit,
            config: self.config,
        }
    }
}

// The router is itself a provider, so it can stand in wherever a single backend is expected.
#[async_trait]
impl LlmProvider for Router {
    fn name(&self) -> &str {
        "lfr-router"
    }

    async fn is_available(&self) -> bool {
        if self.local.is_available().await {
            return true;
        }
        match &self.cloud {
            Some(cloud) => cloud.is_available().await,
            None => false,
        }
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let chat = ChatRequest {
            conversation: request.turns,
            model: request.model,
            temperature: request.temperature,
            conversation_id: None,
        };

        // The error code prefix keeps local and cloud outages distinguishable.
        let decision = self.route(chat).await.map_err(|e| match e {
            RouterError::Configuration(msg) => LlmError::NotConfigured(msg),
            other => LlmError::Unavailable(format!("{}: {}", other.code(), other)),
        })?;

        Ok(LlmResponse {
            content: decision.answer,
            model: decision.model,
            usage: decision.usage,
            latency_ms: decision.latency_ms,
        })
    }
}
