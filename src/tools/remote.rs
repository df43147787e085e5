//! 远程工具
//!
//! 远程工具服务通过 ToolTransport 暴露 list_tools / call 两个操作；
//! discover_tools 把服务端的工具描述转为 RemoteTool，与本地工具一样注册进 ToolRegistry。
//! 传输实现见 http.rs（plain HTTP JSON-RPC）与 stdio.rs（本地子进程管道）。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::RegistryError;
use crate::rpc::JsonRpcError;
use crate::tools::{ParamSpec, ParamType, Tool};

/// 传输层错误
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC error {0}")]
    Rpc(#[from] JsonRpcError),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// 服务端执行成功返回但标记 isError
    #[error("{0}")]
    ToolFailed(String),

    #[error("tool server exited")]
    ServerExited,
}

/// 服务端公布的工具描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", alias = "input_schema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<RemoteToolDescriptor>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContentBlock {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

impl CallToolResult {
    /// 文本块按行拼接，非文本块保留其 JSON
    pub fn into_text(self) -> Result<String, TransportError> {
        let text = self
            .content
            .into_iter()
            .map(|block| match block.text {
                Some(text) => text,
                None => {
                    let mut obj = block.rest;
                    obj.insert("type".into(), Value::String(block.kind));
                    Value::Object(obj).to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        if self.is_error {
            Err(TransportError::ToolFailed(text))
        } else {
            Ok(text)
        }
    }
}

/// 远程工具传输
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<RemoteToolDescriptor>, TransportError>;

    async fn call(&self, name: &str, args: Value) -> Result<String, TransportError>;
}

/// 由远程描述构造的工具，调用委托给 transport
pub struct RemoteTool {
    name: String,
    description: String,
    parameters: Vec<ParamSpec>,
    transport: Arc<dyn ToolTransport>,
}

impl std::fmt::Debug for RemoteTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTool")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl RemoteTool {
    /// 解析 inputSchema；类型缺失或无法识别的参数保留为 None，由注册校验拒绝
    pub fn from_descriptor(
        descriptor: RemoteToolDescriptor,
        transport: Arc<dyn ToolTransport>,
    ) -> Result<Self, RegistryError> {
        let parameters = params_from_schema(&descriptor.name, &descriptor.input_schema)?;
        Ok(Self {
            name: descriptor.name,
            description: descriptor.description.unwrap_or_default(),
            parameters,
            transport,
        })
    }
}

/// 参数顺序与服务端声明的 properties 顺序一致
fn params_from_schema(tool: &str, schema: &Value) -> Result<Vec<ParamSpec>, RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidSchema {
        tool: tool.to_string(),
        reason: reason.to_string(),
    };

    let obj = match schema {
        Value::Null => return Ok(Vec::new()),
        Value::Object(obj) => obj,
        _ => return Err(invalid("inputSchema is not an object")),
    };
    let required: Vec<&str> = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let Some(properties) = obj.get("properties") else {
        return Ok(Vec::new());
    };
    let properties = properties
        .as_object()
        .ok_or_else(|| invalid("properties is not an object"))?;

    Ok(properties
        .iter()
        .map(|(name, prop)| ParamSpec {
            name: name.clone(),
            param_type: prop
                .get("type")
                .and_then(Value::as_str)
                .and_then(ParamType::from_json_type),
            required: required.contains(&name.as_str()),
            description: prop
                .get("description")
                .and_then(Value::as_str)
                .map(String::from),
        })
        .collect())
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        self.parameters.clone()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        self.transport
            .call(&self.name, args)
            .await
            .map_err(|e| e.to_string())
    }
}

/// 列出服务端工具并逐个转为 RemoteTool
pub async fn discover_tools(
    transport: Arc<dyn ToolTransport>,
) -> Result<Vec<RemoteTool>, RegistryError> {
    let descriptors = transport
        .list_tools()
        .await
        .map_err(|e| RegistryError::Discovery(e.to_string()))?;
    tracing::info!(count = descriptors.len(), "Discovered remote tools");
    descriptors
        .into_iter()
        .map(|d| RemoteTool::from_descriptor(d, Arc::clone(&transport)))
        .collect()
}
