//! LLM 客户端抽象
//!
//! 运行循环只依赖 LlmClient::complete：输入完整消息列表 + 工具 schema（+ 可选输出 schema），
//! 返回带标签的回复：纯文本或一组工具调用请求，并尽量附带 token 用量。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::{Message, ToolCallRequest};
use crate::react::OutputSchema;
use crate::tools::ToolSchema;

/// 单次调用的 token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// 模型回复的两种形态
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyContent {
    PlainText(String),
    ToolCalls(Vec<ToolCallRequest>),
}

/// 模型回复
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub content: ReplyContent,
    /// 后端未返回用量时为 None
    pub usage: Option<TokenUsage>,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: ReplyContent::PlainText(text.into()),
            usage: None,
        }
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: ReplyContent::ToolCalls(calls),
            usage: None,
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some(TokenUsage {
            input_tokens,
            output_tokens,
        });
        self
    }
}

/// 一次补全请求
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolSchema],
    pub response_schema: Option<&'a OutputSchema>,
}

/// 模型调用失败（不可在运行循环内恢复）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    /// 服务端返回的结构化错误
    #[error("provider error: {0}")]
    Provider(String),

    #[error("malformed reply: {0}")]
    MalformedReply(String),

    #[error("no scripted reply left")]
    Exhausted,
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 模型 ID（记录到 span，并用于价格查询）
    fn model_id(&self) -> &str;

    /// 非流式完成
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<ModelReply, LlmError>;
}
