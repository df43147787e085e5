//! 执行轨迹：Span / Trace 数据模型、派生指标与消息还原

pub mod agent_trace;
pub mod messages;
pub mod span;

pub use agent_trace::{CostInfo, FinalOutput, TokenInfo, Trace};
pub use messages::spans_to_messages;
pub use span::{attrs, OutputType, Span, SpanKind, SpanStatus};
