//! 多轮会话集成测试：运行 -> merge -> 带历史的下一轮提示词

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use hive::gateway::{AgentRuntime, SendParams, SessionManager, TaskStatus, UserMessage};
use hive::llm::{CompletionRequest, LlmClient, LlmError, ModelReply, ScriptedLlmClient};
use hive::trace::FinalOutput;
use hive::{Agent, RunConfig};

/// 提示词含 "slow" 时挂起，直到 release 被通知
#[derive(Default)]
struct GatedLlm {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl LlmClient for GatedLlm {
    fn model_id(&self) -> &str {
        "gated"
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<ModelReply, LlmError> {
        let prompt = request.messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        if prompt.contains("slow") {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(ModelReply::text(
            json!({"task_status": "completed", "data": {"result": "ok"}}).to_string(),
        ))
    }
}

fn agent(llm: Arc<dyn LlmClient>) -> Agent {
    let config = RunConfig {
        name: "memory-agent".into(),
        description: Some("Remembers what you tell it".into()),
        ..RunConfig::default()
    };
    Agent::new(llm, Vec::new(), config).unwrap()
}

fn send(text: &str, context_id: &str) -> SendParams {
    SendParams {
        context_id: Some(context_id.to_string()),
        task_id: None,
        message: UserMessage::Text(text.to_string()),
    }
}

#[tokio::test]
async fn test_alice_scenario() {
    let llm = Arc::new(
        ScriptedLlmClient::new("mock")
            .with_reply(ModelReply::text("Hi Alice!"))
            .with_reply(ModelReply::text("Your name is Alice.")),
    );
    let agent = agent(llm.clone());
    let sessions = SessionManager::new(Duration::from_secs(600));
    let ctx = "ctx-alice";
    sessions.resolve_or_create(ctx).await;

    let prompt = sessions.format_prompt(ctx, "My name is Alice.").await;
    assert_eq!(prompt, "My name is Alice.");
    let out = agent.run(&prompt).await.unwrap();
    assert!(out.is_success());
    assert_eq!(out.final_output(), Some(&FinalOutput::Text("Hi Alice!".into())));
    sessions.merge(ctx, &out.trace, "My name is Alice.").await.unwrap();

    let prompt = sessions.format_prompt(ctx, "What's my name?").await;
    let reply_at = prompt.find("Hi Alice!").unwrap();
    let current_at = prompt.find("Current user message: What's my name?").unwrap();
    assert!(reply_at < current_at);

    let out = agent.run(&prompt).await.unwrap();
    sessions.merge(ctx, &out.trace, "What's my name?").await.unwrap();

    // 历史只保存原始问题，格式化后的提示词不会被嵌套进下一轮
    let prompt = sessions.format_prompt(ctx, "Thanks").await;
    assert_eq!(prompt.matches("Previous conversation:").count(), 1);
    assert!(prompt.contains("User: What's my name?\n"));
    assert!(prompt.contains("Assistant: Your name is Alice."));
    assert_eq!(llm.call_count(), 2);
}

#[tokio::test]
async fn test_merge_with_formatted_query_is_rejected() {
    let llm = Arc::new(ScriptedLlmClient::new("mock").with_reply(ModelReply::text("ok")));
    let agent = agent(llm);
    let sessions = SessionManager::new(Duration::from_secs(600));
    sessions.resolve_or_create("ctx").await;

    let out = agent.run("Tell me a joke").await.unwrap();
    let err = sessions.merge("ctx", &out.trace, "What's my name?").await.unwrap_err();
    assert!(err.to_string().contains("Context integrity violation"));
}

#[tokio::test]
async fn test_runtime_turns_share_context() {
    let envelope = |result: &str| {
        ModelReply::text(json!({"task_status": "completed", "data": {"result": result}}).to_string())
    };
    let llm = Arc::new(
        ScriptedLlmClient::new("mock")
            .with_reply(envelope("Hi Alice!"))
            .with_reply(envelope("Your name is Alice.")),
    );
    let runtime = AgentRuntime::new(
        agent(llm.clone()),
        Arc::new(SessionManager::new(Duration::from_secs(600))),
    );

    let first = runtime.send(send("My name is Alice.", "ctx")).await.unwrap();
    assert_eq!(first.task_status, TaskStatus::Completed);

    let second = runtime.send(send("What's my name?", "ctx")).await.unwrap();
    assert_eq!(second.data, Some(json!({"result": "Your name is Alice."})));
    assert_ne!(second.task_id, first.task_id);

    let prompt = &llm.requests()[1].messages[1].content;
    assert!(prompt.contains("Hi Alice!"));
    assert!(prompt.ends_with("Current user message: What's my name?"));
}

#[tokio::test]
async fn test_concurrent_sends_on_one_context_keep_integrity() {
    let llm = Arc::new(ScriptedLlmClient::repeating(
        "mock",
        ModelReply::text(json!({"task_status": "completed", "data": {"result": "noted"}}).to_string()),
    ));
    let runtime = Arc::new(AgentRuntime::new(
        agent(llm),
        Arc::new(SessionManager::new(Duration::from_secs(600))),
    ));

    let (a, b) = tokio::join!(
        runtime.send(send("first fact", "shared")),
        runtime.send(send("second fact", "shared")),
    );
    assert_eq!(a.unwrap().task_status, TaskStatus::Completed);
    assert_eq!(b.unwrap().task_status, TaskStatus::Completed);

    let prompt = runtime.sessions().format_prompt("shared", "next").await;
    let first_at = prompt.find("User: first fact").unwrap();
    let second_at = prompt.find("User: second fact").unwrap();
    assert!(first_at < second_at);
    assert_eq!(prompt.matches("Previous conversation:").count(), 1);
}

#[tokio::test]
async fn test_blocked_context_does_not_block_others() {
    let llm = Arc::new(GatedLlm::default());
    let runtime = Arc::new(AgentRuntime::new(
        agent(llm.clone()),
        Arc::new(SessionManager::new(Duration::from_secs(600))),
    ));

    let slow = tokio::spawn({
        let runtime = Arc::clone(&runtime);
        async move { runtime.send(send("slow question", "a")).await }
    });
    llm.entered.notified().await;

    let fast = tokio::time::timeout(Duration::from_secs(5), runtime.send(send("quick question", "b")))
        .await
        .expect("context b waited on context a")
        .unwrap();
    assert_eq!(fast.task_status, TaskStatus::Completed);
    assert!(!slow.is_finished());

    llm.release.notify_one();
    let slow = slow.await.unwrap().unwrap();
    assert_eq!(slow.task_status, TaskStatus::Completed);
    assert_eq!(slow.context_id, "a");
}

#[tokio::test]
async fn test_independent_contexts_do_not_leak() {
    let llm = Arc::new(ScriptedLlmClient::repeating(
        "mock",
        ModelReply::text(json!({"task_status": "completed", "data": {"result": "ok"}}).to_string()),
    ));
    let runtime = AgentRuntime::new(
        agent(llm),
        Arc::new(SessionManager::new(Duration::from_secs(600))),
    );

    runtime.send(send("secret for a", "a")).await.unwrap();
    runtime.send(send("hello from b", "b")).await.unwrap();

    let prompt_b = runtime.sessions().format_prompt("b", "next").await;
    assert!(!prompt_b.contains("secret for a"));
}
