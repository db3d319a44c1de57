//! Gateway - OpenAI-style HTTP surface over the routing engine

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use lfr_llm::{Role, Turn, Usage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::audit::{AuditLog, AuditRecord, AuditSummary};
use crate::config::Config;
use crate::router::{ChatRequest, Route, Router as RoutingEngine, RouterError};

const MAX_LOG_PAGE: usize = 100;

/// Shared handler state
pub struct AppState {
    pub config: Config,
    pub engine: RoutingEngine,
    pub audit: Arc<AuditLog>,
}

/// HTTP server wrapping a configured engine
pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    /// `audit` should be the same log the engine records into.
    pub fn new(config: Config, engine: RoutingEngine, audit: Arc<AuditLog>) -> Self {
        Self {
            state: Arc::new(AppState {
                config,
                engine,
                audit,
            }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(health_check))
            .route("/v1/chat/completions", post(chat_completions))
            .route("/api/logs", get(recent_logs))
            .route("/api/logs/summary", get(logs_summary))
            .route("/api/config", get(public_config))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive())
                    .into_inner(),
            )
            .with_state(self.state.clone())
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.state.config.bind_addr();
        info!(
            addr = %addr,
            local_model = %self.state.config.local_model,
            cloud = self.state.engine.cloud_configured(),
            "local-first router listening"
        );

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl From<ChatCompletionRequest> for ChatRequest {
    fn from(req: ChatCompletionRequest) -> Self {
        let conversation = req
            .messages
            .into_iter()
            .map(|m| Turn {
                role: m.role,
                text: m.content,
                image: m.image,
            })
            .collect();

        ChatRequest {
            conversation,
            model: req.model,
            temperature: req.temperature,
            conversation_id: req.conversation_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: AssistantMessage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub choices: Vec<Choice>,
    pub usage: Usage,
    pub model: String,
    pub local_model: Option<String>,
    pub route: Route,
    pub confidence: f64,
    pub latency_ms: u64,
    pub estimated_cost_usd: f64,
    pub estimated_cost_saved_usd: f64,
    pub conversation_id: String,
}

/// Router failure rendered as `503 {error: {code, message}}`
pub struct ApiError(RouterError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.0.code(),
                "message": self.0.to_string(),
            }
        });
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "local-first-router",
    }))
}

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Json<ChatCompletionResponse>, ApiError> {
    let decision = state.engine.route(request.into()).await.map_err(ApiError)?;

    Ok(Json(ChatCompletionResponse {
        id: decision.id,
        object: "chat.completion".to_string(),
        created: decision.created_at.timestamp(),
        choices: vec![Choice {
            index: 0,
            message: AssistantMessage {
                role: "assistant".to_string(),
                content: decision.answer,
            },
        }],
        usage: decision.usage,
        model: decision.model,
        local_model: decision.local_model,
        route: decision.route,
        confidence: decision.confidence,
        latency_ms: decision.latency_ms,
        estimated_cost_usd: decision.estimated_cost_usd,
        estimated_cost_saved_usd: decision.estimated_cost_saved_usd,
        conversation_id: decision.conversation_id,
    }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn recent_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<AuditRecord>> {
    let limit = query.limit.unwrap_or(MAX_LOG_PAGE).min(MAX_LOG_PAGE);
    Json(state.audit.recent(limit))
}

async fn logs_summary(State(state): State<Arc<AppState>>) -> Json<AuditSummary> {
    Json(state.audit.summary())
}

async fn public_config(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let catalog = state.engine.catalog();
    let cloud_model = if state.engine.cloud_configured() {
        catalog.cloud_model()
    } else {
        ""
    };

    Json(serde_json::json!({
        "local_models": catalog.local_models(),
        "default_local_model": catalog.default_local(),
        "cloud_model": cloud_model,
        "confidence_threshold": state.engine.config().confidence_threshold,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use lfr_llm::{LlmError, MockProvider};
    use tower::ServiceExt;

    fn server(local: MockProvider) -> Server {
        let audit = Arc::new(AuditLog::new(10));
        let config = Config::default();
        let engine = RoutingEngine::builder(Arc::new(local))
            .with_config(&config)
            .audit(audit.clone())
            .build();
        Server::new(config, engine, audit)
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn chat(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = server(MockProvider::constant("x")).router();
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["service"], "local-first-router");
    }

    #[tokio::test]
    async fn test_chat_completion_local() {
        let srv = server(MockProvider::confident("Four.", 0.9));
        let response = srv
            .router()
            .oneshot(chat(serde_json::json!({
                "messages": [{"role": "user", "content": "2+2?"}],
                "conversation_id": "conv-1"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["choices"][0]["message"]["content"], "Four.");
        assert_eq!(body["route"], "local");
        assert_eq!(body["conversation_id"], "conv-1");

        let logs = srv
            .router()
            .oneshot(Request::builder().uri("/api/logs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let rows = json_body(logs).await;
        assert_eq!(rows.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_router_error_is_503() {
        let srv = server(MockProvider::failing(LlmError::Unavailable("refused".into())));
        let response = srv
            .router()
            .oneshot(chat(serde_json::json!({
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "local_unavailable");
    }

    #[tokio::test]
    async fn test_config_hides_cloud_without_credential() {
        let app = server(MockProvider::constant("x")).router();
        let response = app
            .oneshot(Request::builder().uri("/api/config").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = json_body(response).await;
        assert_eq!(body["cloud_model"], "");
        assert_eq!(body["default_local_model"], "llama3.2:latest");
    }
}
