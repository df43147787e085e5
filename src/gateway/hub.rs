//! Hub：HTTP 接入层
//!
//! - `GET {endpoint}/.well-known/agent.json`：agent card
//! - `POST {endpoint}`：JSON-RPC 2.0（`message/send`、`tasks/get`、`tasks/cancel`）
//!
//! 关闭时先停止 accept，再在宽限期内等待进行中的请求，超时后强制取消，最后清空会话。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::ServingSection;
use crate::core::{AgentError, ShutdownManager, ShutdownReason};
use crate::gateway::card::{card_url, AgentCard};
use crate::gateway::message::{ProtocolError, SendParams, TaskIdParams};
use crate::gateway::runtime::AgentRuntime;
use crate::rpc::{JsonRpcRequest, JsonRpcResponse};

pub const AGENT_CARD_PATH: &str = "/.well-known/agent.json";

struct HubState {
    runtime: Arc<AgentRuntime>,
    card: AgentCard,
    shutdown: Arc<ShutdownManager>,
}

/// 规范化路由前缀："/" 与 "" 均视为根
fn base_path(endpoint: &str) -> String {
    let trimmed = endpoint.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// 构建路由（测试可直接对其 oneshot）
pub fn router(
    runtime: Arc<AgentRuntime>,
    card: AgentCard,
    shutdown: Arc<ShutdownManager>,
    endpoint: &str,
) -> Router {
    let base = base_path(endpoint);
    let rpc_path = if base.is_empty() { "/".to_string() } else { base.clone() };
    let state = Arc::new(HubState {
        runtime,
        card,
        shutdown,
    });

    Router::new()
        .route(&format!("{base}{AGENT_CARD_PATH}"), get(agent_card))
        .route(&rpc_path, post(handle_rpc))
        .with_state(state)
}

async fn agent_card(State(state): State<Arc<HubState>>) -> Json<AgentCard> {
    Json(state.card.clone())
}

async fn handle_rpc(
    State(state): State<Arc<HubState>>,
    body: Bytes,
) -> (StatusCode, Json<JsonRpcResponse>) {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return reply_error(None, ProtocolError::Parse(e.to_string())),
    };
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => return reply_error(None, ProtocolError::InvalidRequest(e.to_string())),
    };
    if request.jsonrpc != "2.0" {
        return reply_error(
            request.id,
            ProtocolError::InvalidRequest(format!("unsupported jsonrpc version '{}'", request.jsonrpc)),
        );
    }

    let Some(in_flight) = state.shutdown.track() else {
        let response = JsonRpcResponse::failure(
            request.id,
            crate::rpc::INTERNAL_ERROR,
            "server is shutting down",
        );
        return (StatusCode::SERVICE_UNAVAILABLE, Json(response));
    };

    let id = request.id.clone();
    match in_flight.run(dispatch(&state.runtime, request)).await {
        Some(Ok(result)) => (StatusCode::OK, Json(JsonRpcResponse::success(id, result))),
        Some(Err(e)) => reply_error(id, e),
        None => reply_error(
            id,
            ProtocolError::Internal("request cancelled during shutdown".into()),
        ),
    }
}

async fn dispatch(runtime: &AgentRuntime, request: JsonRpcRequest) -> Result<Value, ProtocolError> {
    tracing::debug!(method = %request.method, "JSON-RPC request");
    match request.method.as_str() {
        "message/send" => {
            let params: SendParams = parse_params(request.params)?;
            let result = runtime.send(params).await?;
            to_value(&result)
        }
        "tasks/get" => {
            let params: TaskIdParams = parse_params(request.params)?;
            let task = runtime.get_task(&params.task_id).await?;
            to_value(&task)
        }
        "tasks/cancel" => {
            let params: TaskIdParams = parse_params(request.params)?;
            let err = runtime.cancel(&params.task_id).await;
            tracing::warn!(task_id = %params.task_id, code = err.code(), "Cancel requested");
            Err(err)
        }
        other => Err(ProtocolError::MethodNotFound(other.to_string())),
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ProtocolError> {
    let params = params.ok_or_else(|| ProtocolError::InvalidParams("missing params".into()))?;
    serde_json::from_value(params).map_err(|e| ProtocolError::InvalidParams(e.to_string()))
}

fn to_value<T: serde::Serialize>(v: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(v).map_err(|e| ProtocolError::Internal(e.to_string()))
}

fn reply_error(
    id: Option<crate::rpc::RequestId>,
    err: ProtocolError,
) -> (StatusCode, Json<JsonRpcResponse>) {
    (
        StatusCode::OK,
        Json(JsonRpcResponse::failure(id, err.code(), err.to_string())),
    )
}

/// 运行中的服务
pub struct ServerHandle {
    addr: SocketAddr,
    runtime: Arc<AgentRuntime>,
    shutdown: Arc<ShutdownManager>,
    join: JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// 实际监听端口（配置为 0 时由系统分配）
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn shutdown_manager(&self) -> &Arc<ShutdownManager> {
        &self.shutdown
    }

    /// 停止 accept，等待进行中的请求最多 grace，之后强制取消并清空会话。
    /// 返回是否在宽限期内全部完成
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.shutdown.shutdown(ShutdownReason::Requested);
        let drained = self.shutdown.drain(grace).await;

        match self.join.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Server exited with error"),
            Err(e) => tracing::error!(error = %e, "Server task panicked"),
        }

        self.runtime.teardown().await;
        tracing::info!(addr = %self.addr, drained, "Server stopped");
        drained
    }
}

/// 绑定端口并在后台启动服务
pub async fn serve(
    runtime: AgentRuntime,
    serving: &ServingSection,
    shutdown: Arc<ShutdownManager>,
) -> Result<ServerHandle, AgentError> {
    let listener = TcpListener::bind((serving.host.as_str(), serving.port)).await?;
    let addr = listener.local_addr()?;

    let url = card_url(&serving.host, addr.port(), &serving.endpoint);
    let card = AgentCard::for_agent(runtime.agent(), &serving.version, url.clone())?;
    let runtime = Arc::new(runtime);
    let app = router(Arc::clone(&runtime), card, Arc::clone(&shutdown), &serving.endpoint);

    let token = shutdown.token();
    let join = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
    });

    tracing::info!(
        agent = %runtime.agent().name(),
        url = %url,
        "Serving agent"
    );

    Ok(ServerHandle {
        addr,
        runtime,
        shutdown,
        join,
    })
}
