//! 运行层：工具调用主循环、回调与结构化输出

pub mod callbacks;
pub mod loop_;
pub mod output;

pub use loop_::{react_loop, ReactSession, RunOutcome, RunOutput, DEFAULT_INSTRUCTIONS, MAX_TURNS_REACHED};
pub use callbacks::{default_callbacks, Callback, CallbackContext, CostCallback, Hook, SpanLogger};
pub use output::OutputSchema;
