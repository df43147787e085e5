//! Trace → 扁平消息历史
//!
//! 多轮对话的历史只通过这里重建。纯函数：同一 Trace 总是得到同样的结果。

use serde_json::Value;

use crate::memory::Message;
use crate::trace::span::{attrs, Span, SpanKind};
use crate::trace::Trace;

/// 规则：
/// - 跳过 agent_invocation span
/// - model_call：输入消息按结构相等去重后追加；输出作为 assistant 消息追加，
///   与上一条完全相同时跳过
/// - tool_execution：追加一条 `[Tool {name} executed: {output} with args: {args}]` 的 assistant 消息
pub fn spans_to_messages(trace: &Trace) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::new();

    for span in trace.spans() {
        match span.kind {
            SpanKind::AgentInvocation => {}
            SpanKind::ModelCall => {
                for m in decode_input_messages(span) {
                    if !messages.contains(&m) {
                        messages.push(m);
                    }
                }
                if let Some(output) = span.attribute_str(attrs::OUTPUT) {
                    let reply = Message::assistant(output);
                    if messages.last() != Some(&reply) {
                        messages.push(reply);
                    }
                }
            }
            SpanKind::ToolExecution => {
                let name = span.attribute_str(attrs::TOOL_NAME).unwrap_or("unknown");
                let output = span.attribute_str(attrs::OUTPUT).unwrap_or_default();
                let args = span
                    .attribute(attrs::TOOL_ARGS)
                    .map(value_text)
                    .unwrap_or_else(|| "{}".to_string());
                messages.push(Message::assistant(format!(
                    "[Tool {name} executed: {output} with args: {args}]"
                )));
            }
        }
    }

    messages
}

/// 输入消息以 JSON 文本（或 JSON 数组）记录；只保留 role + content
fn decode_input_messages(span: &Span) -> Vec<Message> {
    let decoded: Option<Vec<Message>> = match span.attribute(attrs::INPUT_MESSAGES) {
        Some(Value::String(s)) => serde_json::from_str(s).ok(),
        Some(v @ Value::Array(_)) => serde_json::from_value(v.clone()).ok(),
        _ => None,
    };
    match decoded {
        Some(list) => list.iter().map(Message::to_plain).collect(),
        None => {
            if span.attribute(attrs::INPUT_MESSAGES).is_some() {
                tracing::warn!(span = %span.name, "Undecodable input messages on model call span");
            }
            Vec::new()
        }
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
