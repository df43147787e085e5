//! Agent Runtime（代理运行时）
//!
//! 处理一次 send：确定任务 -> 锁定会话并格式化提示词 -> 运行 -> merge -> 取出 Envelope -> 返回终态。
//! merge 失败使整个请求失败；运行失败时仍使用其携带的部分 Trace 继续处理。

use std::sync::Arc;

use schemars::JsonSchema;
use serde_json::Value;

use crate::agent::Agent;
use crate::gateway::message::{
    DefaultBody, Envelope, ProtocolError, SendParams, SendResult, TaskStatus,
};
use crate::gateway::session::SessionManager;
use crate::gateway::task_queue::{Task, TaskStore};

/// Agent Runtime：持有 Agent、会话管理器与任务表，可被多个请求并发共享
pub struct AgentRuntime {
    agent: Arc<Agent>,
    sessions: Arc<SessionManager>,
    tasks: Arc<TaskStore>,
}

impl AgentRuntime {
    /// Agent 未配置输出 schema 时使用 Envelope<DefaultBody>
    pub fn new(agent: Agent, sessions: Arc<SessionManager>) -> Self {
        Self::with_body::<DefaultBody>(agent, sessions)
    }

    /// 以 Envelope<T> 作为 Agent 的输出 schema
    pub fn with_body<T: JsonSchema>(agent: Agent, sessions: Arc<SessionManager>) -> Self {
        let agent = if agent.config().output_schema.is_some() {
            agent
        } else {
            agent.with_output_schema(Envelope::<T>::output_schema())
        };
        let tasks = Arc::new(TaskStore::new(sessions.timeout()));
        Self {
            agent: Arc::new(agent),
            sessions,
            tasks,
        }
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    /// 处理一条用户消息
    pub async fn send(&self, params: SendParams) -> Result<SendResult, ProtocolError> {
        let query = params.message.text();
        if query.trim().is_empty() {
            return Err(ProtocolError::InvalidParams("message has no text".into()));
        }

        let task = self
            .tasks
            .begin(params.task_id.as_deref(), params.context_id.as_deref())
            .await?;

        // 同一会话的请求在此排队，直到本请求 merge 完成
        let mut session = self.sessions.acquire(&task.context_id).await;
        let prompt = self.sessions.render(&session, &query);

        let (trace, run_error) = match self.agent.run(&prompt).await {
            Ok(output) => (output.trace, None),
            Err(e) => {
                tracing::error!(
                    task_id = %task.id,
                    context_id = %task.context_id,
                    error = %e,
                    "Served request failed"
                );
                let message = e.source.to_string();
                (e.into_trace(), Some(message))
            }
        };

        if let Err(e) = session.merge(&trace, &query) {
            drop(session);
            tracing::error!(
                task_id = %task.id,
                context_id = %task.context_id,
                error = %e,
                "Context merge failed"
            );
            self.tasks
                .finish(&failed(&task, e.to_string()))
                .await;
            return Err(ProtocolError::Internal(e.to_string()));
        }
        drop(session);

        let result = match Envelope::<Value>::from_final_output(trace.final_output.as_ref()) {
            Ok(envelope) => SendResult {
                task_id: task.id.clone(),
                context_id: task.context_id.clone(),
                task_status: envelope.task_status,
                data: Some(envelope.data),
                error: None,
            },
            Err(e) => failed(&task, run_error.unwrap_or_else(|| e.to_string())),
        };

        tracing::info!(
            task_id = %result.task_id,
            context_id = %result.context_id,
            status = result.task_status.as_str(),
            tokens = trace.tokens().total_tokens(),
            "Task finished"
        );
        self.tasks.finish(&result).await;
        Ok(result)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task, ProtocolError> {
        self.tasks
            .get(task_id)
            .await
            .ok_or_else(|| ProtocolError::TaskNotFound(task_id.to_string()))
    }

    /// 不支持中途取消：已知任务返回 UnsupportedOperation，未知任务返回 TaskNotFound
    pub async fn cancel(&self, task_id: &str) -> ProtocolError {
        match self.tasks.get(task_id).await {
            Some(_) => ProtocolError::UnsupportedOperation("cancel not supported".into()),
            None => ProtocolError::TaskNotFound(task_id.to_string()),
        }
    }

    /// 关闭时清空会话与任务
    pub async fn teardown(&self) {
        self.sessions.teardown().await;
        self.tasks.clear().await;
    }
}

fn failed(task: &Task, error: String) -> SendResult {
    SendResult {
        task_id: task.id.clone(),
        context_id: task.context_id.clone(),
        task_status: TaskStatus::Failed,
        data: None,
        error: Some(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::agent::RunConfig;
    use crate::gateway::message::UserMessage;
    use crate::gateway::task_queue::TaskState;
    use crate::llm::{LlmError, ModelReply, ScriptedLlmClient};

    fn envelope(status: &str, result: &str) -> ModelReply {
        ModelReply::text(json!({"task_status": status, "data": {"result": result}}).to_string())
    }

    fn runtime(llm: Arc<ScriptedLlmClient>, max_turns: usize) -> AgentRuntime {
        let config = RunConfig {
            name: "test-agent".into(),
            description: Some("test".into()),
            max_turns,
            ..RunConfig::default()
        };
        let agent = Agent::new(llm, Vec::new(), config).unwrap();
        AgentRuntime::new(agent, Arc::new(SessionManager::new(Duration::from_secs(600))))
    }

    fn send(text: &str, context_id: Option<&str>, task_id: Option<&str>) -> SendParams {
        SendParams {
            context_id: context_id.map(String::from),
            task_id: task_id.map(String::from),
            message: UserMessage::Text(text.into()),
        }
    }

    #[tokio::test]
    async fn test_send_completed() {
        let llm = Arc::new(ScriptedLlmClient::new("mock").with_reply(envelope("completed", "Hi Alice!")));
        let rt = runtime(llm.clone(), 5);

        let result = rt.send(send("My name is Alice.", Some("ctx"), None)).await.unwrap();
        assert_eq!(result.task_status, TaskStatus::Completed);
        assert_eq!(result.data, Some(json!({"result": "Hi Alice!"})));
        assert_eq!(result.context_id, "ctx");
        // 首轮即合法 Envelope，不触发修正调用
        assert_eq!(llm.call_count(), 1);
        assert!(!llm.requests()[0].has_response_schema);
        assert_eq!(
            rt.get_task(&result.task_id).await.unwrap().state,
            TaskState::Completed
        );
    }

    #[tokio::test]
    async fn test_input_required_then_continue_same_task() {
        let llm = Arc::new(
            ScriptedLlmClient::new("mock")
                .with_reply(envelope("input_required", "Which city?"))
                .with_reply(envelope("completed", "Sunny in Oslo")),
        );
        let rt = runtime(llm.clone(), 5);

        let first = rt.send(send("What's the weather?", None, None)).await.unwrap();
        assert_eq!(first.task_status, TaskStatus::InputRequired);

        let second = rt
            .send(send("Oslo", Some(&first.context_id), Some(&first.task_id)))
            .await
            .unwrap();
        assert_eq!(second.task_id, first.task_id);
        assert_eq!(second.task_status, TaskStatus::Completed);

        let prompt = &llm.requests()[1].messages[1].content;
        assert!(prompt.contains("Assistant: "));
        assert!(prompt.ends_with("Current user message: Oslo"));

        let err = rt
            .send(send("again", Some(&first.context_id), Some(&first.task_id)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_plain_text_output_is_failed_task() {
        let llm = Arc::new(ScriptedLlmClient::repeating("mock", ModelReply::text("no envelope here")));
        let rt = runtime(llm, 5);

        let result = rt.send(send("hi", None, None)).await.unwrap();
        assert_eq!(result.task_status, TaskStatus::Failed);
        assert!(result.data.is_none());
        assert!(result.error.unwrap().contains("Structured output error"));
    }

    #[tokio::test]
    async fn test_model_failure_still_merges_partial_trace() {
        let llm = Arc::new(ScriptedLlmClient::new("mock").with_error(LlmError::Network("refused".into())));
        let rt = runtime(llm, 5);

        let result = rt.send(send("hello", Some("ctx"), None)).await.unwrap();
        assert_eq!(result.task_status, TaskStatus::Failed);
        assert!(result.error.unwrap().contains("refused"));
        assert_ne!(rt.sessions().format_prompt("ctx", "next").await, "next");
    }

    #[tokio::test]
    async fn test_cancel_fails_loudly() {
        let llm = Arc::new(ScriptedLlmClient::new("mock").with_reply(envelope("completed", "ok")));
        let rt = runtime(llm, 5);
        let result = rt.send(send("hi", None, None)).await.unwrap();

        assert_eq!(rt.cancel(&result.task_id).await.code(), -32004);
        assert_eq!(rt.cancel("unknown").await.code(), -32001);
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let llm = Arc::new(ScriptedLlmClient::new("mock"));
        let rt = runtime(llm.clone(), 5);
        let err = rt.send(send("   ", None, None)).await.unwrap_err();
        assert_eq!(err.code(), -32602);
        assert_eq!(llm.call_count(), 0);
    }
}
