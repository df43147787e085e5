//! Span：一次运行中的单个子事件（模型调用 / 工具执行 / 整体调用）
//!
//! 属性键沿用 OpenTelemetry gen-ai 语义约定，见 [`attrs`]。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// gen-ai 属性键
pub mod attrs {
    pub const OPERATION_NAME: &str = "gen_ai.operation.name";
    pub const REQUEST_MODEL: &str = "gen_ai.request.model";
    pub const REQUEST_ID: &str = "gen_ai.request.id";
    pub const INPUT_MESSAGES: &str = "gen_ai.input.messages";
    pub const OUTPUT: &str = "gen_ai.output";
    pub const OUTPUT_TYPE: &str = "gen_ai.output.type";
    pub const USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
    pub const USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
    pub const USAGE_INPUT_COST: &str = "gen_ai.usage.input_cost";
    pub const USAGE_OUTPUT_COST: &str = "gen_ai.usage.output_cost";
    pub const TOOL_NAME: &str = "gen_ai.tool.name";
    pub const TOOL_ARGS: &str = "gen_ai.tool.args";
    pub const TOOL_DESCRIPTION: &str = "gen_ai.tool.description";
    pub const TOOL_CALL_ID: &str = "gen_ai.tool.call.id";
    pub const AGENT_NAME: &str = "gen_ai.agent.name";
    pub const AGENT_DESCRIPTION: &str = "gen_ai.agent.description";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    AgentInvocation,
    ModelCall,
    ToolExecution,
}

impl SpanKind {
    /// gen_ai.operation.name 的取值
    pub fn operation_name(&self) -> &'static str {
        match self {
            Self::AgentInvocation => "invoke_agent",
            Self::ModelCall => "call_llm",
            Self::ToolExecution => "execute_tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "description", rename_all = "lowercase")]
pub enum SpanStatus {
    Ok,
    Error(String),
}

/// 输出内容类型（gen_ai.output.type）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    Text,
    Json,
}

impl OutputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }

    /// 可解析为 JSON 对象或数组的输出视为 json
    pub fn detect(output: &str) -> Self {
        match serde_json::from_str::<Value>(output) {
            Ok(Value::Object(_)) | Ok(Value::Array(_)) => Self::Json,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub kind: SpanKind,
    pub name: String,
    pub status: SpanStatus,
    /// Unix 纳秒
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

pub fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

impl Span {
    /// 以当前时间开启一个 span
    pub fn start(kind: SpanKind, name: impl Into<String>) -> Self {
        let mut span = Self {
            kind,
            name: name.into(),
            status: SpanStatus::Ok,
            start_time: Some(now_nanos()),
            end_time: None,
            attributes: Map::new(),
        };
        span.set_attribute(attrs::OPERATION_NAME, kind.operation_name());
        span
    }

    pub fn end(&mut self) {
        self.end_time = Some(now_nanos());
    }

    pub fn set_attribute(&mut self, key: &str, value: impl Into<Value>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn set_error(&mut self, description: impl Into<String>) {
        self.status = SpanStatus::Error(description.into());
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status, SpanStatus::Error(_))
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    pub fn attribute_u64(&self, key: &str) -> Option<u64> {
        self.attributes.get(key).and_then(Value::as_u64)
    }

    pub fn attribute_f64(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(Value::as_f64)
    }

    pub fn is_model_call(&self) -> bool {
        self.kind == SpanKind::ModelCall
    }

    pub fn is_tool_execution(&self) -> bool {
        self.kind == SpanKind::ToolExecution
    }

    pub fn is_agent_invocation(&self) -> bool {
        self.kind == SpanKind::AgentInvocation
    }
}
