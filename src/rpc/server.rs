//! RPC 服务端（axum，JSON over HTTP）
//!
//! 路由：
//! - `/v1/adapter-control/*`：初始化适配器、远程关闭
//! - `/v1/perception/*`、`/v1/action/*`：转发到目标应用已加载的适配器
//! - `/v1/engine/*`：引擎状态与任务
//! - `/v1/adapters`：已注册 / 已加载的适配器

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;

use super::messages::*;
use crate::core::{Runtime, ShutdownManager, ShutdownReason};
use crate::plugins::adapter::contain;
use crate::plugins::{
    ActionAdapter, ActionResult, AdapterConfig, AdapterError, AdapterInstancePair, CapabilityKind, PerceptionAdapter,
    UiSnapshot,
};

/// RPC 错误及其 HTTP 映射
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("no target application given and no adapter has been initialized")]
    NoTarget,

    #[error("adapter '{0}' is not loaded")]
    NotLoaded(String),

    #[error("adapter '{name}' has no {capability} capability")]
    MissingCapability { name: String, capability: CapabilityKind },

    #[error("{0}")]
    Unsupported(String),

    #[error("adapter call failed: {0}")]
    Adapter(String),
}

impl RpcError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NoTarget | Self::NotLoaded(_) => StatusCode::NOT_FOUND,
            Self::MissingCapability { .. } => StatusCode::CONFLICT,
            Self::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Adapter(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AdapterError> for RpcError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Unsupported(_) => Self::Unsupported(e.to_string()),
            other => Self::Adapter(other.to_string()),
        }
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "RPC call failed");
        } else {
            tracing::warn!(error = %self, "RPC call rejected");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

type RpcResult<T> = Result<Json<T>, RpcError>;

/// 处理器共享状态
pub struct RpcState {
    runtime: Runtime,
    shutdown: Arc<ShutdownManager>,
    /// 最近一次 Initialize 成功的适配器名
    default_target: Mutex<Option<String>>,
}

impl RpcState {
    pub fn new(runtime: Runtime, shutdown: Arc<ShutdownManager>) -> Self {
        Self {
            runtime,
            shutdown,
            default_target: Mutex::new(None),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    fn set_default_target(&self, name: &str) {
        *self.default_target.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(name.to_string());
    }

    fn resolve_pair(&self, target_app: Option<&str>) -> Result<Arc<AdapterInstancePair>, RpcError> {
        let name = match target_app {
            Some(name) => name.to_string(),
            None => self
                .default_target
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone()
                .ok_or(RpcError::NoTarget)?,
        };
        self.runtime.pool.loaded(&name).ok_or(RpcError::NotLoaded(name))
    }

    fn perception(&self, target_app: Option<&str>) -> Result<Arc<dyn PerceptionAdapter>, RpcError> {
        let pair = self.resolve_pair(target_app)?;
        pair.perception.clone().ok_or_else(|| RpcError::MissingCapability {
            name: pair.name.clone(),
            capability: CapabilityKind::Perception,
        })
    }

    fn action(&self, target_app: Option<&str>) -> Result<Arc<dyn ActionAdapter>, RpcError> {
        let pair = self.resolve_pair(target_app)?;
        pair.action.clone().ok_or_else(|| RpcError::MissingCapability {
            name: pair.name.clone(),
            capability: CapabilityKind::Action,
        })
    }
}

/// 构建路由
pub fn router(state: Arc<RpcState>) -> Router {
    Router::new()
        .route("/v1/adapter-control/initialize", post(initialize))
        .route("/v1/adapter-control/shutdown", post(shutdown))
        .route("/v1/perception/get-ui-snapshot", post(get_ui_snapshot))
        .route("/v1/perception/find-element", post(find_element))
        .route("/v1/perception/find-elements", post(find_elements))
        .route("/v1/perception/get-element-state", post(get_element_state))
        .route("/v1/perception/get-element-text", post(get_element_text))
        .route("/v1/perception/get-focused-element", post(get_focused_element))
        .route("/v1/action/click", post(click))
        .route("/v1/action/type-text", post(type_text))
        .route("/v1/action/scroll", post(scroll))
        .route("/v1/action/press-key", post(press_key))
        .route("/v1/action/drag-and-drop", post(drag_and_drop))
        .route("/v1/action/execute-native-command", post(execute_native_command))
        .route("/v1/engine/status", get(engine_status))
        .route("/v1/engine/start", post(engine_start))
        .route("/v1/engine/stop", post(engine_stop))
        .route("/v1/engine/run-task", post(run_task))
        .route("/v1/adapters", get(list_adapters))
        .with_state(state)
}

/// 运行服务直到 ShutdownManager 被触发；之后在宽限期内等待处理中的请求，超时则强制中止
pub async fn serve(listener: TcpListener, state: Arc<RpcState>, grace: Duration) -> anyhow::Result<()> {
    let manager = Arc::clone(&state.shutdown);
    let token = manager.token();
    let addr = listener.local_addr()?;
    let app = router(state);

    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
    });
    tracing::info!(%addr, "RPC server listening");

    tokio::select! {
        result = &mut server => {
            result??;
            tracing::info!("RPC server exited");
            return Ok(());
        }
        _ = manager.wait_for_shutdown() => {
            tracing::info!(reason = ?manager.reason(), "Stopping RPC server...");
        }
    }

    match tokio::time::timeout(grace, &mut server).await {
        Ok(result) => {
            result??;
            tracing::info!("RPC server stopped gracefully");
        }
        Err(_) => {
            tracing::warn!(?grace, "RPC server did not stop within grace period, aborting");
            server.abort();
        }
    }
    Ok(())
}

// ---------- AdapterControl ----------

async fn initialize(State(state): State<Arc<RpcState>>, Json(req): Json<InitializeRequest>) -> Json<ControlResponse> {
    tracing::info!(adapter = %req.adapter_name, "RPC: Initialize received");
    let config = if req.config.is_empty() {
        state
            .runtime
            .config
            .adapters
            .get(&req.adapter_name)
            .cloned()
            .unwrap_or_default()
    } else {
        match AdapterConfig::from_map(req.config) {
            Ok(config) => config,
            Err(e) => return Json(ControlResponse::failed(format!("invalid adapter config: {e}"))),
        }
    };

    match state.runtime.pool.get(&req.adapter_name, &config).await {
        Ok(_) => {
            state.set_default_target(&req.adapter_name);
            Json(ControlResponse::ok(format!(
                "Adapter {} initialized successfully",
                req.adapter_name
            )))
        }
        Err(e) => {
            tracing::error!(adapter = %req.adapter_name, error = %e, "RPC: Initialize failed");
            Json(ControlResponse::failed(e.to_string()))
        }
    }
}

/// 立即应答；引擎停止与服务关闭在独立任务中进行
///
/// 引擎停止最多等待 `shutdown_grace_ms`，之后无论是否完成都触发服务关闭，
/// 卡住的 close() 交给 main 中带超时的清理流程。
async fn shutdown(State(state): State<Arc<RpcState>>) -> Json<ControlResponse> {
    tracing::info!("RPC: Shutdown received");
    let engine = Arc::clone(&state.runtime.engine);
    let manager = Arc::clone(&state.shutdown);
    let grace = Duration::from_millis(state.runtime.config.server.shutdown_grace_ms);
    tokio::spawn(async move {
        if tokio::time::timeout(grace, engine.stop()).await.is_err() {
            tracing::warn!(?grace, "Engine did not stop within grace period, shutting down server anyway");
        }
        manager.shutdown(ShutdownReason::Remote);
    });
    Json(ControlResponse::ok("Shutdown initiated"))
}

// ---------- Perception ----------

async fn get_ui_snapshot(State(state): State<Arc<RpcState>>, Json(req): Json<SnapshotRequest>) -> RpcResult<UiSnapshot> {
    tracing::info!("RPC: GetUISnapshot received");
    let perception = state.perception(req.target_app.as_deref())?;
    Ok(Json(contain(perception.get_ui_snapshot(&req.options)).await?))
}

async fn find_element(
    State(state): State<Arc<RpcState>>,
    Json(req): Json<FindElementRequest>,
) -> RpcResult<ElementResponse> {
    tracing::info!(strategy = %req.query.strategy, query = %req.query.query, "RPC: FindElement received");
    let perception = state.perception(req.target_app.as_deref())?;
    let element = contain(perception.find_element(&req.query)).await?;
    Ok(Json(ElementResponse { element }))
}

async fn find_elements(
    State(state): State<Arc<RpcState>>,
    Json(req): Json<FindElementRequest>,
) -> RpcResult<ElementsResponse> {
    tracing::info!(strategy = %req.query.strategy, query = %req.query.query, "RPC: FindElements received");
    let perception = state.perception(req.target_app.as_deref())?;
    let elements = contain(perception.find_elements(&req.query)).await?;
    tracing::debug!(count = elements.len(), "RPC: FindElements returning");
    Ok(Json(ElementsResponse { elements }))
}

async fn get_element_state(
    State(state): State<Arc<RpcState>>,
    Json(req): Json<ElementRequest>,
) -> RpcResult<ElementStateResponse> {
    tracing::info!(element = %req.element_id, "RPC: GetElementState received");
    let perception = state.perception(req.target_app.as_deref())?;
    let element_state = contain(perception.get_element_state(&req.element_id)).await?;
    Ok(Json(ElementStateResponse { state: element_state }))
}

async fn get_element_text(
    State(state): State<Arc<RpcState>>,
    Json(req): Json<ElementRequest>,
) -> RpcResult<ElementTextResponse> {
    tracing::info!(element = %req.element_id, "RPC: GetElementText received");
    let perception = state.perception(req.target_app.as_deref())?;
    let text = contain(perception.get_element_text(&req.element_id)).await?;
    Ok(Json(ElementTextResponse { text }))
}

async fn get_focused_element(
    State(state): State<Arc<RpcState>>,
    Json(req): Json<TargetRequest>,
) -> RpcResult<ElementResponse> {
    tracing::info!("RPC: GetFocusedElement received");
    let perception = state.perception(req.target_app.as_deref())?;
    let element = contain(perception.get_focused_element()).await?;
    Ok(Json(ElementResponse { element }))
}

// ---------- Action ----------

/// 适配器错误转为失败的 ActionResult（不是 HTTP 错误）
fn action_result(operation: &str, result: Result<ActionResult, AdapterError>) -> Json<ActionResult> {
    match result {
        Ok(result) => Json(result),
        Err(e) => {
            tracing::error!(operation, error = %e, "Action failed");
            Json(ActionResult::failed(e.to_string()))
        }
    }
}

async fn click(State(state): State<Arc<RpcState>>, Json(req): Json<ClickRequest>) -> RpcResult<ActionResult> {
    tracing::info!(element = %req.element_id, "RPC: Click received");
    let action = state.action(req.target_app.as_deref())?;
    Ok(action_result("click", contain(action.click(&req.element_id, &req.options)).await))
}

async fn type_text(State(state): State<Arc<RpcState>>, Json(req): Json<TypeTextRequest>) -> RpcResult<ActionResult> {
    tracing::info!(element = ?req.element_id, "RPC: TypeText received");
    let action = state.action(req.target_app.as_deref())?;
    let result = contain(action.type_text(&req.text, req.element_id.as_ref(), &req.options)).await;
    Ok(action_result("type_text", result))
}

async fn scroll(State(state): State<Arc<RpcState>>, Json(req): Json<ScrollRequest>) -> RpcResult<ActionResult> {
    tracing::info!(direction = ?req.direction, magnitude = req.magnitude, "RPC: Scroll received");
    let action = state.action(req.target_app.as_deref())?;
    let result = contain(action.scroll(req.direction, req.magnitude, req.element_id.as_ref(), &req.options)).await;
    Ok(action_result("scroll", result))
}

async fn press_key(State(state): State<Arc<RpcState>>, Json(req): Json<PressKeyRequest>) -> RpcResult<ActionResult> {
    tracing::info!(keys = %req.key_combination, "RPC: PressKey received");
    let action = state.action(req.target_app.as_deref())?;
    let result = contain(action.press_key(&req.key_combination, &req.options)).await;
    Ok(action_result("press_key", result))
}

async fn drag_and_drop(
    State(state): State<Arc<RpcState>>,
    Json(req): Json<DragAndDropRequest>,
) -> RpcResult<ActionResult> {
    tracing::info!(source = %req.source_element_id, "RPC: DragAndDrop received");
    let action = state.action(req.target_app.as_deref())?;
    let result = contain(action.drag_and_drop(&req.source_element_id, req.target, &req.options)).await;
    Ok(action_result("drag_and_drop", result))
}

async fn execute_native_command(
    State(state): State<Arc<RpcState>>,
    Json(req): Json<NativeCommandRequest>,
) -> RpcResult<ActionResult> {
    tracing::info!(command = %req.command_name, "RPC: ExecuteNativeCommand received");
    let action = state.action(req.target_app.as_deref())?;
    let result = contain(action.execute_native_command(&req.command_name, &req.params)).await;
    Ok(action_result("execute_native_command", result))
}

// ---------- Engine ----------

async fn engine_status(State(state): State<Arc<RpcState>>) -> Json<EngineStatusResponse> {
    Json(EngineStatusResponse {
        state: state.runtime.engine.status(),
    })
}

async fn engine_start(State(state): State<Arc<RpcState>>) -> Json<ControlResponse> {
    tracing::info!("RPC: StartEngine received");
    match state.runtime.engine.start() {
        Ok(()) => Json(ControlResponse::ok(format!("Engine is {}", state.runtime.engine.status()))),
        Err(e) => Json(ControlResponse::failed(e.to_string())),
    }
}

async fn engine_stop(State(state): State<Arc<RpcState>>) -> Json<ControlResponse> {
    tracing::info!("RPC: StopEngine received");
    state.runtime.engine.stop().await;
    Json(ControlResponse::ok(format!("Engine is {}", state.runtime.engine.status())))
}

async fn run_task(State(state): State<Arc<RpcState>>, Json(req): Json<RunTaskRequest>) -> Json<RunTaskResponse> {
    tracing::info!(target_app = %req.target_app, "RPC: RunTask received");
    match state.runtime.engine.run_task(&req.description, &req.target_app).await {
        Ok(outcome) => Json(RunTaskResponse {
            success: outcome.is_completed(),
            message: String::new(),
            outcome: Some(outcome),
        }),
        Err(e) => Json(RunTaskResponse {
            success: false,
            outcome: None,
            message: e.to_string(),
        }),
    }
}

async fn list_adapters(State(state): State<Arc<RpcState>>) -> Json<AdaptersResponse> {
    Json(AdaptersResponse {
        registered: state.runtime.pool.list_registered(),
        loaded: state.runtime.pool.list_loaded(),
    })
}
