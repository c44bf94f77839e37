//! Web 服务器模块
//!
//! 提供路由器的 HTTP 管理接口：消息、Agent、插件、A2A 任务和健康检查

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::core::messaging::EchoHandler;
use crate::domain::{AgentDescriptor, Artifact, Message, Recipient};
use crate::errors::RouterError;
use crate::infrastructure::logger::Timer;
use crate::protocol::a2a::{A2AAdapter, A2A_PLUGIN_ID};
use crate::protocol::router::Router as MessageRouter;

const DEFAULT_HISTORY_LIMIT: usize = 50;

// ==================== 错误响应 ====================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

/// 把 `RouterError` 映射为 HTTP 响应
pub struct ApiError(RouterError);

impl From<RouterError> for ApiError {
    fn from(err: RouterError) -> Self {
        Self(err)
    }
}

/// 错误对应的 HTTP 状态码
pub fn status_for(err: &RouterError) -> StatusCode {
    match err {
        RouterError::NotFound { .. } => StatusCode::NOT_FOUND,
        RouterError::DuplicateAgent(_)
        | RouterError::DuplicatePlugin(_)
        | RouterError::Dependency { .. }
        | RouterError::InvalidState { .. } => StatusCode::CONFLICT,
        RouterError::UnknownAgent(_) | RouterError::Config(_) => StatusCode::BAD_REQUEST,
        RouterError::NotTaskOwner { .. } => StatusCode::FORBIDDEN,
        RouterError::AgentUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        RouterError::Delivery { .. } => StatusCode::BAD_GATEWAY,
        RouterError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RouterError::PluginInit { .. } | RouterError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!("API request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: self.0.code(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ==================== 状态 ====================

pub struct AppState {
    pub router: MessageRouter,
    pub a2a: Option<Arc<A2AAdapter>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(router: MessageRouter, a2a: Option<Arc<A2AAdapter>>) -> Self {
        Self {
            router,
            a2a,
            started_at: Utc::now(),
        }
    }

    fn adapter(&self) -> ApiResult<&Arc<A2AAdapter>> {
        self.a2a
            .as_ref()
            .ok_or_else(|| RouterError::not_found("Plugin", A2A_PLUGIN_ID).into())
    }
}

// ==================== 请求类型 ====================

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub sender: String,
    pub recipient: String,
    #[serde(rename = "type", default = "default_message_type")]
    pub msg_type: String,
    #[serde(default)]
    pub content: Value,
    /// 超时毫秒数，超时后投递仍在后台继续
    pub timeout_ms: Option<u64>,
}

fn default_message_type() -> String {
    "chat".to_string()
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct RegisterAgentRequest {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub echo: bool,
}

#[derive(Deserialize)]
pub struct DisableQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub agent_id: String,
    #[serde(default)]
    pub input: Vec<Artifact>,
    /// 创建后立即交给目标 Agent
    #[serde(default = "default_true")]
    pub start: bool,
}

fn default_true() -> bool {
    true
}

// ==================== 处理器 ====================

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let router = &state.router;
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "started_at": state.started_at,
        "agents": router.registry().len().await,
        "plugins": router.plugins().list().await.len(),
        "history": router.history_len().await,
        "timestamp": Utc::now(),
    }))
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let _timer = Timer::new("api.send_message");
    let message = Message::new(
        req.sender,
        Recipient::from(req.recipient),
        req.msg_type,
        req.content,
    );

    let result = match req.timeout_ms {
        Some(ms) => {
            state
                .router
                .send_with_timeout(message, Duration::from_millis(ms))
                .await?
        }
        None => state.router.send(message).await?,
    };
    Ok(Json(result))
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(state.router.history(limit).await.to_vec())
}

async fn list_agents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.router.registry().list().await)
}

async fn register_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterAgentRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = req.name.unwrap_or_else(|| req.id.clone());
    let descriptor = AgentDescriptor::new(req.id.clone(), name).with_capabilities(req.capabilities);
    let handler = req
        .echo
        .then(|| Arc::new(EchoHandler::new(req.id.clone())) as Arc<dyn crate::core::messaging::MessageHandler>);

    let agent = state.router.register_agent(descriptor, handler).await?;
    info!("Agent {} registered via API", agent.id);
    Ok((StatusCode::CREATED, Json(agent)))
}

async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let agent = state
        .router
        .registry()
        .find(&id)
        .await
        .ok_or_else(|| RouterError::not_found("Agent", &id))?;
    Ok(Json(agent))
}

async fn deregister_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.router.deregister_agent(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_plugins(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.router.plugins().list().await)
}

async fn plugin_info(state: &AppState, id: &str) -> ApiResult<Json<crate::domain::PluginInfo>> {
    state
        .router
        .plugins()
        .info(id)
        .await
        .map(Json)
        .ok_or_else(|| RouterError::not_found("Plugin", id).into())
}

async fn enable_plugin(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.router.plugins().enable(&id).await?;
    plugin_info(&state, &id).await
}

async fn disable_plugin(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<DisableQuery>,
) -> ApiResult<impl IntoResponse> {
    let disabled = state.router.plugins().disable(&id, query.force).await?;
    Ok(Json(serde_json::json!({ "disabled": disabled })))
}

async fn reload_plugin(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.router.plugins().reload(&id).await?;
    plugin_info(&state, &id).await
}

async fn list_tasks(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.adapter()?.list_tasks().await))
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let adapter = state.adapter()?;
    let task_id = adapter.create_task(&req.agent_id, req.input).await?;
    let task = if req.start {
        adapter.start_task(&task_id).await?
    } else {
        adapter.get_task(&task_id).await?
    };
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.adapter()?.get_task(&id).await?))
}

async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.adapter()?.cancel_task(&id).await?))
}

// ==================== 路由 ====================

pub fn create_router(state: Arc<AppState>) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/messages", get(list_messages).post(send_message))
        .route("/api/agents", get(list_agents).post(register_agent))
        .route("/api/agents/{id}", get(get_agent).delete(deregister_agent))
        .route("/api/plugins", get(list_plugins))
        .route("/api/plugins/{id}/enable", post(enable_plugin))
        .route("/api/plugins/{id}/disable", post(disable_plugin))
        .route("/api/plugins/{id}/reload", post(reload_plugin))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        .layer(middleware)
        .with_state(state)
}

// ==================== 服务器启动 ====================

/// 在已绑定的监听器上提供服务，直到收到中断信号
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub async fn start_web_server(bind_addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!("Web server started on http://{}", listener.local_addr()?);
    serve(listener, state).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
