//! 协议消息定义
//!
//! 入站 send 参数、出站结果、Envelope（运行的结构化输出）与协议级错误码。

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::AgentError;
use crate::react::OutputSchema;
use crate::rpc;
use crate::trace::FinalOutput;

/// Envelope 中允许的任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 无需更多输入
    Completed,
    /// 调用方应复用同一 context_id / task_id 再发一条消息
    InputRequired,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::InputRequired => "input_required",
            Self::Failed => "failed",
        }
    }
}

/// 运行的最终结构化输出：状态 + 数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Envelope<T> {
    pub task_status: TaskStatus,
    pub data: T,
}

/// 调用方未指定数据类型时的默认数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DefaultBody {
    pub result: String,
}

impl<T: JsonSchema> Envelope<T> {
    /// 作为运行输出 schema 使用
    pub fn output_schema() -> OutputSchema {
        OutputSchema::of::<Self>()
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// 从 Trace 的最终输出中取出 Envelope
    pub fn from_final_output(output: Option<&FinalOutput>) -> Result<Self, AgentError> {
        let value = match output {
            None => return Err(AgentError::InvalidEnvelope("final output absent".into())),
            Some(FinalOutput::Structured(v)) => v.clone(),
            Some(FinalOutput::Text(s)) => serde_json::from_str(s).map_err(|_| {
                AgentError::InvalidEnvelope("final output is plain text, not an envelope".into())
            })?,
        };
        serde_json::from_value(value).map_err(|e| AgentError::InvalidEnvelope(e.to_string()))
    }
}

/// 消息片段（只取文本）
#[derive(Debug, Clone, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// 入站用户消息：纯字符串，或带 parts 的对象
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UserMessage {
    Text(String),
    Parts { parts: Vec<Part> },
}

impl UserMessage {
    pub fn text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Parts { parts } => parts
                .iter()
                .filter(|p| p.kind.as_deref().map_or(true, |k| k == "text"))
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// message/send 参数
#[derive(Debug, Clone, Deserialize)]
pub struct SendParams {
    #[serde(default, alias = "contextId")]
    pub context_id: Option<String>,
    #[serde(default, alias = "taskId")]
    pub task_id: Option<String>,
    pub message: UserMessage,
}

/// tasks/get、tasks/cancel 参数
#[derive(Debug, Clone, Deserialize)]
pub struct TaskIdParams {
    #[serde(alias = "taskId", alias = "id")]
    pub task_id: String,
}

/// send 的结果：data 与 error 二选一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResult {
    pub task_id: String,
    pub context_id: String,
    pub task_status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 协议级错误（带 JSON-RPC 错误码）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl ProtocolError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => rpc::PARSE_ERROR,
            Self::InvalidRequest(_) => rpc::INVALID_REQUEST,
            Self::MethodNotFound(_) => rpc::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => rpc::INVALID_PARAMS,
            Self::Internal(_) => rpc::INTERNAL_ERROR,
            Self::TaskNotFound(_) => rpc::TASK_NOT_FOUND,
            Self::UnsupportedOperation(_) => rpc::UNSUPPORTED_OPERATION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_rejects_unknown_fields() {
        let ok: Result<Envelope<DefaultBody>, _> = serde_json::from_value(json!({
            "task_status": "completed",
            "data": {"result": "Hi Alice!"}
        }));
        assert!(ok.is_ok());

        let extra: Result<Envelope<DefaultBody>, _> = serde_json::from_value(json!({
            "task_status": "completed",
            "data": {"result": "x"},
            "note": "unexpected"
        }));
        assert!(extra.is_err());
    }

    #[test]
    fn test_envelope_schema_restricts_status() {
        let schema = Envelope::<DefaultBody>::output_schema();
        let bad = json!({"task_status": "working", "data": {"result": "x"}});
        assert!(schema.validate(&bad).is_err());
        let good = json!({"task_status": "input_required", "data": {"result": "Which city?"}});
        assert!(schema.validate(&good).is_ok());
    }

    #[test]
    fn test_from_final_output() {
        let absent = Envelope::<Value>::from_final_output(None).unwrap_err();
        assert!(matches!(absent, AgentError::InvalidEnvelope(m) if m == "final output absent"));

        let text = FinalOutput::Text("just prose".into());
        assert!(Envelope::<Value>::from_final_output(Some(&text)).is_err());

        let structured = FinalOutput::Structured(json!({"task_status": "failed", "data": {"result": "no"}}));
        let env = Envelope::<DefaultBody>::from_final_output(Some(&structured)).unwrap();
        assert_eq!(env.task_status, TaskStatus::Failed);
    }

    #[test]
    fn test_send_params_accept_parts_and_camel_case() {
        let params: SendParams = serde_json::from_value(json!({
            "contextId": "ctx-1",
            "message": {"role": "user", "parts": [{"kind": "text", "text": "hello"}]}
        }))
        .unwrap();
        assert_eq!(params.context_id.as_deref(), Some("ctx-1"));
        assert_eq!(params.message.text(), "hello");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ProtocolError::UnsupportedOperation("cancel".into()).code(), -32004);
        assert_eq!(ProtocolError::TaskNotFound("t".into()).code(), -32001);
    }
}
