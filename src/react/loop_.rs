//! 工具调用主循环
//!
//! Start -> {ModelTurn <-> ToolTurn} -> Terminal。每次模型调用、工具执行各追加一个 span，
//! 前后各触发一次回调；整体调用的 agent_invocation span 在结束时最后追加。
//! 只受 max_turns 约束：不对单次模型或工具调用施加超时，也不支持中途取消。

use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::{AgentError, RunError};
use crate::llm::{CompletionRequest, LlmClient, ModelReply, ReplyContent};
use crate::memory::{Message, ToolCallRequest};
use crate::react::callbacks::{run_callbacks, Callback, CallbackContext, Hook};
use crate::react::OutputSchema;
use crate::tools::final_answer::answer_from_args;
use crate::tools::{ToolExecutor, ToolSchema, FINAL_ANSWER_TOOL};
use crate::trace::{attrs, FinalOutput, OutputType, Span, SpanKind, Trace};

pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant.";
pub const MAX_TURNS_REACHED: &str = "max turns reached";

/// 运行结果类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// 正常结束但没有得到答案（如达到 max_turns），不是错误
    Inconclusive { reason: String },
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub trace: Trace,
    pub outcome: RunOutcome,
}

impl RunOutput {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }

    pub fn final_output(&self) -> Option<&FinalOutput> {
        self.trace.final_output.as_ref()
    }
}

/// 一次运行所需的全部输入
pub struct ReactSession<'a> {
    pub llm: &'a dyn LlmClient,
    pub executor: &'a ToolExecutor,
    pub agent_name: &'a str,
    pub agent_description: Option<&'a str>,
    /// 为 None 时使用 DEFAULT_INSTRUCTIONS
    pub instructions: Option<&'a str>,
    pub max_turns: usize,
    pub output_schema: Option<&'a OutputSchema>,
    pub callbacks: &'a [Arc<dyn Callback>],
}

impl<'a> ReactSession<'a> {
    pub fn new(llm: &'a dyn LlmClient, executor: &'a ToolExecutor, agent_name: &'a str) -> Self {
        Self {
            llm,
            executor,
            agent_name,
            agent_description: None,
            instructions: None,
            max_turns: 10,
            output_schema: None,
            callbacks: &[],
        }
    }

    pub fn with_instructions(mut self, instructions: &'a str) -> Self {
        self.instructions = Some(instructions);
        self
    }

    pub fn with_description(mut self, description: &'a str) -> Self {
        self.agent_description = Some(description);
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_output_schema(mut self, schema: &'a OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_callbacks(mut self, callbacks: &'a [Arc<dyn Callback>]) -> Self {
        self.callbacks = callbacks;
        self
    }
}

enum Terminal {
    Success(String),
    Inconclusive,
}

/// 单次运行的可变状态：已记录的 span 与回调共享数据
#[derive(Default)]
struct RunState {
    trace: Trace,
    shared: Map<String, Value>,
}

impl RunState {
    async fn fire(
        &mut self,
        callbacks: &[Arc<dyn Callback>],
        hook: Hook,
        span: &mut Span,
    ) -> Result<(), AgentError> {
        let mut ctx = CallbackContext {
            current_span: span,
            trace: &self.trace,
            shared: &mut self.shared,
        };
        run_callbacks(callbacks, hook, &mut ctx).await
    }

    /// 以 error 状态记录 span 并返回原错误
    fn fail(&mut self, mut span: Span, error: AgentError) -> AgentError {
        span.set_error(error.to_string());
        span.end();
        match self.trace.add_span(span) {
            Ok(()) => error,
            Err(e) => e.into(),
        }
    }
}

/// 执行一次运行；模型失败或结构化输出失败时返回携带部分 Trace 的 RunError
pub async fn react_loop(session: &ReactSession<'_>, prompt: &str) -> Result<RunOutput, RunError> {
    let mut run = RunState::default();
    let mut invocation = Span::start(
        SpanKind::AgentInvocation,
        format!("invoke_agent [{}]", session.agent_name),
    )
    .with_attribute(attrs::AGENT_NAME, session.agent_name)
    .with_attribute(attrs::REQUEST_ID, Uuid::new_v4().to_string())
    .with_attribute(attrs::REQUEST_MODEL, session.llm.model_id());
    if let Some(desc) = session.agent_description {
        invocation.set_attribute(attrs::AGENT_DESCRIPTION, desc);
    }

    let result = match drive(session, prompt, &mut run).await {
        Ok(Terminal::Success(raw)) => finalize(session, raw, &mut run).await.map(Some),
        Ok(Terminal::Inconclusive) => Ok(None),
        Err(e) => Err(e),
    };

    match result {
        Ok(output) => {
            let outcome = match &output {
                Some(out) => {
                    invocation.set_attribute(attrs::OUTPUT, out.to_string());
                    RunOutcome::Success
                }
                None => RunOutcome::Inconclusive {
                    reason: MAX_TURNS_REACHED.to_string(),
                },
            };
            invocation.end();
            let mut trace = run.trace;
            trace.final_output = output;
            if let Err(e) = trace.add_span(invocation) {
                return Err(RunError::new(e.into(), trace));
            }
            tracing::info!(
                agent = %session.agent_name,
                outcome = ?outcome,
                spans = trace.spans().len(),
                tokens = trace.tokens().total_tokens(),
                "Agent run finished"
            );
            Ok(RunOutput { trace, outcome })
        }
        Err(e) => {
            invocation.set_error(e.to_string());
            invocation.end();
            let mut trace = run.trace;
            if let Err(closed) = trace.add_span(invocation) {
                tracing::error!(error = %closed, "Failed to record agent invocation span");
            }
            tracing::error!(agent = %session.agent_name, error = %e, "Agent run failed");
            if let Ok(json) = serde_json::to_string(&trace) {
                tracing::debug!(trace = %json, "Failed run trace");
            }
            Err(RunError::new(e, trace))
        }
    }
}

async fn drive(
    session: &ReactSession<'_>,
    prompt: &str,
    run: &mut RunState,
) -> Result<Terminal, AgentError> {
    let instructions = session.instructions.unwrap_or(DEFAULT_INSTRUCTIONS);
    let mut messages = vec![Message::system(instructions), Message::user(prompt)];
    let schemas = session.executor.schemas();
    let mut turn = 0usize;

    loop {
        let reply = model_call(session, &messages, &schemas, None, turn, run).await?;
        let calls = match reply.content {
            ReplyContent::PlainText(text) => return Ok(Terminal::Success(text)),
            ReplyContent::ToolCalls(calls) => calls,
        };

        messages.push(Message::assistant_tool_calls(calls_text(&calls), calls.clone()));
        for call in &calls {
            let ok = tool_call(session, call, &mut messages, run).await?;
            if ok && call.name == FINAL_ANSWER_TOOL {
                if calls.len() > 1 {
                    tracing::debug!(skipped = calls.len() - 1, "Sentinel tool ends run, skipping sibling calls");
                }
                return Ok(Terminal::Success(answer_from_args(&call.arguments)));
            }
        }

        turn += 1;
        if turn >= session.max_turns {
            tracing::warn!(agent = %session.agent_name, max_turns = session.max_turns, "Max turns reached");
            return Ok(Terminal::Inconclusive);
        }
    }
}

/// 调用模型并记录 model_call span；模型或回调失败时 span 以 error 状态追加后再返回错误
async fn model_call(
    session: &ReactSession<'_>,
    messages: &[Message],
    tools: &[ToolSchema],
    response_schema: Option<&OutputSchema>,
    turn: usize,
    run: &mut RunState,
) -> Result<ModelReply, AgentError> {
    let model = session.llm.model_id();
    let mut span = Span::start(SpanKind::ModelCall, format!("call_llm {model}"))
        .with_attribute(attrs::REQUEST_MODEL, model);
    // 修正调用的提示词不进入会话历史
    if response_schema.is_none() {
        span.set_attribute(
            attrs::INPUT_MESSAGES,
            serde_json::to_string(messages).unwrap_or_default(),
        );
    }

    if let Err(e) = run.fire(session.callbacks, Hook::BeforeLlmCall, &mut span).await {
        return Err(run.fail(span, e));
    }

    let request = CompletionRequest {
        messages,
        tools,
        response_schema,
    };
    let reply = match session.llm.complete(request).await {
        Ok(reply) => reply,
        Err(e) => return Err(run.fail(span, e.into())),
    };

    let (output, output_type) = match &reply.content {
        ReplyContent::PlainText(text) => (text.clone(), OutputType::detect(text)),
        ReplyContent::ToolCalls(calls) => (calls_text(calls), OutputType::Json),
    };
    span.set_attribute(attrs::OUTPUT, output);
    span.set_attribute(attrs::OUTPUT_TYPE, output_type.as_str());

    if let Some(usage) = reply.usage {
        span.set_attribute(attrs::USAGE_INPUT_TOKENS, usage.input_tokens);
        span.set_attribute(attrs::USAGE_OUTPUT_TOKENS, usage.output_tokens);
        tracing::debug!(
            model = %model,
            turn,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Model call"
        );
    } else {
        tracing::debug!(model = %model, turn, "Model call (no usage reported)");
    }

    span.end();
    if let Err(e) = run.fire(session.callbacks, Hook::AfterLlmCall, &mut span).await {
        return Err(run.fail(span, e));
    }
    run.trace.add_span(span)?;
    Ok(reply)
}

/// 执行一个工具调用，记录 tool_execution span 并追加 tool 消息；返回调用是否成功。
/// 工具失败作为数据回传给模型，只有回调失败才返回错误
async fn tool_call(
    session: &ReactSession<'_>,
    call: &ToolCallRequest,
    messages: &mut Vec<Message>,
    run: &mut RunState,
) -> Result<bool, AgentError> {
    let mut span = Span::start(SpanKind::ToolExecution, format!("execute_tool {}", call.name))
        .with_attribute(attrs::TOOL_NAME, call.name.as_str())
        .with_attribute(attrs::TOOL_ARGS, call.arguments.to_string())
        .with_attribute(attrs::TOOL_CALL_ID, call.id.as_str());
    if let Some(desc) = session.executor.tool_description(&call.name) {
        span.set_attribute(attrs::TOOL_DESCRIPTION, desc);
    }

    if let Err(e) = run.fire(session.callbacks, Hook::BeforeToolExecution, &mut span).await {
        return Err(run.fail(span, e));
    }

    let outcome = session
        .executor
        .execute(&call.name, call.arguments.clone())
        .await;

    span.set_attribute(attrs::OUTPUT_TYPE, OutputType::detect(&outcome.output).as_str());
    span.set_attribute(attrs::OUTPUT, outcome.output.as_str());
    if let Some(err) = &outcome.error {
        span.set_error(err.as_str());
    }
    span.end();
    if let Err(e) = run.fire(session.callbacks, Hook::AfterToolExecution, &mut span).await {
        return Err(run.fail(span, e));
    }
    run.trace.add_span(span)?;

    messages.push(Message::tool(call.id.as_str(), outcome.output.as_str()));
    Ok(outcome.is_ok())
}

/// 终态处理：配置了输出 schema 时确保结果符合 schema，最多一次修正调用
async fn finalize(
    session: &ReactSession<'_>,
    raw: String,
    run: &mut RunState,
) -> Result<FinalOutput, AgentError> {
    let Some(schema) = session.output_schema else {
        return Ok(FinalOutput::Text(raw));
    };
    if let Ok(value) = schema.parse(&raw) {
        return Ok(FinalOutput::Structured(value));
    }

    tracing::debug!(schema = %schema.name, "Output not conformant, requesting one reformat");
    let messages = schema.coercion_messages(&raw);
    let reply = model_call(session, &messages, &[], Some(schema), 0, run).await?;
    let text = match reply.content {
        ReplyContent::PlainText(text) => text,
        ReplyContent::ToolCalls(_) => {
            return Err(AgentError::StructuredOutput(
                "reformat reply contained tool calls".to_string(),
            ))
        }
    };
    schema
        .parse(&text)
        .map(FinalOutput::Structured)
        .map_err(AgentError::StructuredOutput)
}

/// 工具调用列表的文本形式；assistant 消息内容与 span 输出一致，消息还原时据此去重
fn calls_text(calls: &[ToolCallRequest]) -> String {
    serde_json::to_string(calls).unwrap_or_else(|_| Value::Array(Vec::new()).to_string())
}
