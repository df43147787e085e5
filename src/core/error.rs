//! Agent 错误类型
//!
//! 按边界划分：注册（RegistryError）、工具调用（ToolError，作为数据回传给模型）、
//! 轨迹（TraceError）、运行（AgentError / RunError，后者携带已累积的 Trace）。

use thiserror::Error;

use crate::llm::LlmError;
use crate::trace::Trace;

/// 工具注册失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    /// 没有描述的工具无法暴露给模型，也无法作为 skill 公布
    #[error("Tool {0} has no description")]
    MissingDescription(String),

    #[error("Tool {tool}: parameter '{param}' has a missing or unresolvable type")]
    UnresolvableParameter { tool: String, param: String },

    #[error("Tool {tool}: duplicate parameter '{param}'")]
    DuplicateParameter { tool: String, param: String },

    #[error("Tool {tool}: invalid input schema: {reason}")]
    InvalidSchema { tool: String, reason: String },

    #[error("Remote tool discovery failed: {0}")]
    Discovery(String),
}

/// 工具调用失败；运行循环将其转为文本回传给模型，不向上抛出
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("{0}")]
    ExecutionFailed(String),
}

/// Trace 不变式被破坏或时长无法计算
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    #[error("No spans found in trace")]
    NoSpans,

    #[error("Last span is not the agent invocation")]
    LastSpanNotInvocation,

    #[error("Start or end time is missing for the agent invocation span")]
    MissingTimestamps,

    #[error("Trace contains {0} agent invocation spans")]
    MultipleInvocations(usize),

    /// agent_invocation 之后不能再追加 span
    #[error("Trace is closed by its agent invocation span")]
    SpanAfterInvocation,
}

/// Agent 运行过程中的不可恢复错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// 结构化输出在唯一一次格式修正后仍不合法
    #[error("Structured output error: {0}")]
    StructuredOutput(String),

    /// merge 时的上下文完整性校验失败，属于调用方契约错误
    #[error("Context integrity violation: {0}")]
    ContextIntegrity(String),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Config error: {0}")]
    Config(String),

    /// 回调主动中止运行
    #[error("Callback {name} stopped the run: {reason}")]
    Callback { name: String, reason: String },

    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// 运行失败：携带截至失败时的 Trace（含 error span），供调用方诊断
#[derive(Error, Debug)]
#[error("Agent run failed: {source}")]
pub struct RunError {
    #[source]
    pub source: AgentError,
    pub trace: Box<Trace>,
}

impl RunError {
    pub fn new(source: AgentError, trace: Trace) -> Self {
        Self {
            source,
            trace: Box::new(trace),
        }
    }

    pub fn into_trace(self) -> Trace {
        *self.trace
    }
}
