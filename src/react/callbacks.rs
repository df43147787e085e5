//! 运行回调
//!
//! 每次模型调用、工具执行的前后按注册顺序调用 Callback。回调经 CallbackContext 读写当前 span、
//! 查看已记录的 Trace，并通过 shared 在回调之间、调用之间传递数据（每次运行独立）。
//! 任一回调返回错误即中止运行：当前 span 以 error 状态记录，调用方拿到带部分 Trace 的 RunError。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::llm::PricingLookup;
use crate::trace::{attrs, Span, Trace};

/// 回调可见的运行状态
pub struct CallbackContext<'a> {
    /// 正在进行的 model_call / tool_execution span
    pub current_span: &'a mut Span,
    /// 截至当前 span 之前已记录的 span
    pub trace: &'a Trace,
    pub shared: &'a mut Map<String, Value>,
}

/// 运行回调 trait，默认实现均为空操作
#[async_trait]
pub trait Callback: Send + Sync {
    fn name(&self) -> &str;

    async fn before_llm_call(&self, _ctx: &mut CallbackContext<'_>) -> Result<(), AgentError> {
        Ok(())
    }

    async fn after_llm_call(&self, _ctx: &mut CallbackContext<'_>) -> Result<(), AgentError> {
        Ok(())
    }

    async fn before_tool_execution(&self, _ctx: &mut CallbackContext<'_>) -> Result<(), AgentError> {
        Ok(())
    }

    async fn after_tool_execution(&self, _ctx: &mut CallbackContext<'_>) -> Result<(), AgentError> {
        Ok(())
    }
}

/// 回调挂载点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    BeforeLlmCall,
    AfterLlmCall,
    BeforeToolExecution,
    AfterToolExecution,
}

/// 依次调用 hook，遇到第一个错误即返回
pub async fn run_callbacks(
    callbacks: &[Arc<dyn Callback>],
    hook: Hook,
    ctx: &mut CallbackContext<'_>,
) -> Result<(), AgentError> {
    for callback in callbacks {
        let result = match hook {
            Hook::BeforeLlmCall => callback.before_llm_call(ctx).await,
            Hook::AfterLlmCall => callback.after_llm_call(ctx).await,
            Hook::BeforeToolExecution => callback.before_tool_execution(ctx).await,
            Hook::AfterToolExecution => callback.after_tool_execution(ctx).await,
        };
        if let Err(e) = result {
            tracing::warn!(callback = %callback.name(), hook = ?hook, error = %e, "Callback stopped the run");
            return Err(e);
        }
    }
    Ok(())
}

/// 按价格表为带用量的 model_call span 附加成本；查不到价格时记为 0
pub struct CostCallback {
    pricing: Option<Arc<dyn PricingLookup>>,
}

impl CostCallback {
    pub fn new(pricing: Option<Arc<dyn PricingLookup>>) -> Self {
        Self { pricing }
    }
}

#[async_trait]
impl Callback for CostCallback {
    fn name(&self) -> &str {
        "cost"
    }

    async fn after_llm_call(&self, ctx: &mut CallbackContext<'_>) -> Result<(), AgentError> {
        let span = &mut *ctx.current_span;
        let (Some(input), Some(output)) = (
            span.attribute_u64(attrs::USAGE_INPUT_TOKENS),
            span.attribute_u64(attrs::USAGE_OUTPUT_TOKENS),
        ) else {
            return Ok(());
        };
        let model = span.attribute_str(attrs::REQUEST_MODEL).unwrap_or_default().to_string();

        let (input_cost, output_cost) = self
            .pricing
            .as_ref()
            .and_then(|p| p.price(&model, input, output))
            .unwrap_or_else(|| {
                tracing::warn!(model = %model, "No price for model, cost recorded as 0");
                (0.0, 0.0)
            });
        span.set_attribute(attrs::USAGE_INPUT_COST, input_cost);
        span.set_attribute(attrs::USAGE_OUTPUT_COST, output_cost);
        Ok(())
    }
}

/// 以 debug 级别记录每个结束的 span
pub struct SpanLogger;

impl SpanLogger {
    fn log(span: &Span) {
        tracing::debug!(
            span = %span.name,
            error = span.is_error(),
            output_type = span.attribute_str(attrs::OUTPUT_TYPE).unwrap_or("-"),
            input_tokens = span.attribute_u64(attrs::USAGE_INPUT_TOKENS).unwrap_or(0),
            output_tokens = span.attribute_u64(attrs::USAGE_OUTPUT_TOKENS).unwrap_or(0),
            "Span finished"
        );
    }
}

#[async_trait]
impl Callback for SpanLogger {
    fn name(&self) -> &str {
        "span_logger"
    }

    async fn after_llm_call(&self, ctx: &mut CallbackContext<'_>) -> Result<(), AgentError> {
        Self::log(&*ctx.current_span);
        Ok(())
    }

    async fn after_tool_execution(&self, ctx: &mut CallbackContext<'_>) -> Result<(), AgentError> {
        Self::log(&*ctx.current_span);
        Ok(())
    }
}

/// Agent 默认回调：成本、span 日志
pub fn default_callbacks(pricing: Option<Arc<dyn PricingLookup>>) -> Vec<Arc<dyn Callback>> {
    vec![Arc::new(CostCallback::new(pricing)), Arc::new(SpanLogger)]
}
