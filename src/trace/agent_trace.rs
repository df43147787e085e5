//! Trace：一次运行按时间顺序记录的 Span 序列与最终输出
//!
//! 不变式：至多一个 agent_invocation span，且若存在必为最后一个元素。
//! tokens / cost 为派生缓存，每次追加 span 时失效重算。

use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::TraceError;
use crate::memory::Message;
use crate::trace::span::{attrs, Span};

/// 运行的最终输出：纯文本或结构化值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FinalOutput {
    Text(String),
    Structured(Value),
}

impl FinalOutput {
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Structured(v) => Some(v),
            Self::Text(_) => None,
        }
    }

    /// 转为 JSON 值（文本作为字符串）
    pub fn to_value(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Structured(v) => v.clone(),
        }
    }
}

impl std::fmt::Display for FinalOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Structured(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenInfo {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostInfo {
    pub input_cost: f64,
    pub output_cost: f64,
}

impl CostInfo {
    pub fn total_cost(&self) -> f64 {
        self.input_cost + self.output_cost
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trace {
    spans: Vec<Span>,
    pub final_output: Option<FinalOutput>,
    #[serde(skip)]
    tokens_cache: OnceLock<TokenInfo>,
    #[serde(skip)]
    cost_cache: OnceLock<CostInfo>,
}

impl PartialEq for Trace {
    fn eq(&self, other: &Self) -> bool {
        self.spans == other.spans && self.final_output == other.final_output
    }
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// agent_invocation span 关闭 Trace：之后的任何追加都被拒绝
    pub fn add_span(&mut self, span: Span) -> Result<(), TraceError> {
        if self.spans.last().is_some_and(Span::is_agent_invocation) {
            return Err(TraceError::SpanAfterInvocation);
        }
        self.spans.push(span);
        self.invalidate();
        Ok(())
    }

    fn invalidate(&mut self) {
        self.tokens_cache = OnceLock::new();
        self.cost_cache = OnceLock::new();
    }

    /// 最后一个 span 为 agent_invocation 且时间戳齐全时才有定义
    pub fn duration(&self) -> Result<Duration, TraceError> {
        let span = self.spans.last().ok_or(TraceError::NoSpans)?;
        // 反序列化得到的 Trace 不经过 add_span
        let invocations = self.spans.iter().filter(|s| s.is_agent_invocation()).count();
        if invocations > 1 {
            return Err(TraceError::MultipleInvocations(invocations));
        }
        if !span.is_agent_invocation() {
            return Err(TraceError::LastSpanNotInvocation);
        }
        match (span.start_time, span.end_time) {
            (Some(start), Some(end)) => {
                Ok(Duration::from_nanos(end.saturating_sub(start).max(0) as u64))
            }
            _ => Err(TraceError::MissingTimestamps),
        }
    }

    /// 所有 model_call span 的 token 之和
    pub fn tokens(&self) -> TokenInfo {
        *self.tokens_cache.get_or_init(|| {
            self.spans
                .iter()
                .filter(|s| s.is_model_call())
                .fold(TokenInfo::default(), |acc, s| TokenInfo {
                    input_tokens: acc.input_tokens
                        + s.attribute_u64(attrs::USAGE_INPUT_TOKENS).unwrap_or(0),
                    output_tokens: acc.output_tokens
                        + s.attribute_u64(attrs::USAGE_OUTPUT_TOKENS).unwrap_or(0),
                })
        })
    }

    /// 所有 model_call span 的成本之和
    pub fn cost(&self) -> CostInfo {
        *self.cost_cache.get_or_init(|| {
            self.spans
                .iter()
                .filter(|s| s.is_model_call())
                .fold(CostInfo::default(), |acc, s| CostInfo {
                    input_cost: acc.input_cost
                        + s.attribute_f64(attrs::USAGE_INPUT_COST).unwrap_or(0.0),
                    output_cost: acc.output_cost
                        + s.attribute_f64(attrs::USAGE_OUTPUT_COST).unwrap_or(0.0),
                })
        })
    }

    /// 还原为扁平消息历史，见 [`crate::trace::spans_to_messages`]
    pub fn spans_to_messages(&self) -> Vec<Message> {
        crate::trace::messages::spans_to_messages(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::span::SpanKind;

    fn model_span(input: u64, output: u64, cost: f64) -> Span {
        Span::start(SpanKind::ModelCall, "call_llm test")
            .with_attribute(attrs::USAGE_INPUT_TOKENS, input)
            .with_attribute(attrs::USAGE_OUTPUT_TOKENS, output)
            .with_attribute(attrs::USAGE_INPUT_COST, cost)
            .with_attribute(attrs::USAGE_OUTPUT_COST, cost * 2.0)
    }

    #[test]
    fn test_duration_errors() {
        let mut trace = Trace::new();
        assert_eq!(trace.duration(), Err(TraceError::NoSpans));

        trace.add_span(model_span(1, 1, 0.0)).unwrap();
        assert_eq!(trace.duration(), Err(TraceError::LastSpanNotInvocation));

        let mut invocation = Span::start(SpanKind::AgentInvocation, "invoke_agent");
        invocation.start_time = None;
        trace.add_span(invocation).unwrap();
        assert_eq!(trace.duration(), Err(TraceError::MissingTimestamps));
    }

    #[test]
    fn test_duration_from_invocation_span() {
        let mut invocation = Span::start(SpanKind::AgentInvocation, "invoke_agent");
        invocation.start_time = Some(1_000);
        invocation.end_time = Some(2_500_001_000);
        let mut trace = Trace::new();
        trace.add_span(invocation).unwrap();
        assert_eq!(trace.duration().unwrap(), Duration::from_millis(2500));
    }

    #[test]
    fn test_invocation_closes_trace() {
        let mut trace = Trace::new();
        trace.add_span(model_span(1, 1, 0.0)).unwrap();
        trace
            .add_span(Span::start(SpanKind::AgentInvocation, "invoke_agent"))
            .unwrap();

        let err = trace
            .add_span(Span::start(SpanKind::AgentInvocation, "invoke_agent"))
            .unwrap_err();
        assert_eq!(err, TraceError::SpanAfterInvocation);
        assert_eq!(
            trace.add_span(model_span(1, 1, 0.0)),
            Err(TraceError::SpanAfterInvocation)
        );
        assert_eq!(trace.spans().len(), 2);
    }

    #[test]
    fn test_duration_rejects_multiple_invocations() {
        let invocation = Span::start(SpanKind::AgentInvocation, "invoke_agent");
        let json = serde_json::json!({
            "spans": [invocation.clone(), invocation],
            "final_output": null
        });
        let trace: Trace = serde_json::from_value(json).unwrap();
        assert_eq!(trace.duration(), Err(TraceError::MultipleInvocations(2)));
    }

    #[test]
    fn test_tokens_and_cost_recomputed_after_add_span() {
        let mut trace = Trace::new();
        trace.add_span(model_span(10, 5, 0.01)).unwrap();
        assert_eq!(trace.tokens().total_tokens(), 15);

        trace
            .add_span(Span::start(SpanKind::ToolExecution, "execute_tool echo"))
            .unwrap();
        trace.add_span(model_span(20, 7, 0.02)).unwrap();
        let tokens = trace.tokens();
        assert_eq!(tokens.input_tokens, 30);
        assert_eq!(tokens.output_tokens, 12);
        assert!((trace.cost().total_cost() - 0.09).abs() < 1e-9);
    }

    #[test]
    fn test_final_output_untagged_serde() {
        let text: FinalOutput = serde_json::from_str(r#""done""#).unwrap();
        assert_eq!(text, FinalOutput::Text("done".into()));
        let structured: FinalOutput = serde_json::from_str(r#"{"a":1}"#).unwrap();
        assert!(structured.as_structured().is_some());
    }
}
