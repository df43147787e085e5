//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预先排好的回复；队列耗尽后若设置了 fallback 则一直返回 fallback，否则报 Exhausted。
//! 每次调用都会记录收到的请求，便于断言调用次数与消息内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CompletionRequest, LlmClient, LlmError, ModelReply};
use crate::memory::Message;

/// 一次被记录的请求
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
    pub has_response_schema: bool,
}

/// 脚本化客户端
#[derive(Debug)]
pub struct ScriptedLlmClient {
    model: String,
    replies: Mutex<VecDeque<Result<ModelReply, LlmError>>>,
    fallback: Option<ModelReply>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            replies: Mutex::new(VecDeque::new()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 每次调用都返回同一个回复
    pub fn repeating(model: impl Into<String>, reply: ModelReply) -> Self {
        Self {
            fallback: Some(reply),
            ..Self::new(model)
        }
    }

    pub fn with_reply(self, reply: ModelReply) -> Self {
        self.lock_replies().push_back(Ok(reply));
        self
    }

    pub fn with_error(self, error: LlmError) -> Self {
        self.lock_replies().push_back(Err(error));
        self
    }

    pub fn call_count(&self) -> usize {
        self.lock_requests().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock_requests().clone()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<ModelReply, LlmError>>> {
        self.replies.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_requests(&self) -> std::sync::MutexGuard<'_, Vec<RecordedRequest>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<ModelReply, LlmError> {
        self.lock_requests().push(RecordedRequest {
            messages: request.messages.to_vec(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
            has_response_schema: request.response_schema.is_some(),
        });

        match self.lock_replies().pop_front() {
            Some(reply) => reply,
            None => self.fallback.clone().ok_or(LlmError::Exhausted),
        }
    }
}
