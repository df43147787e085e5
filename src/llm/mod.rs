//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）与价格查询

pub mod mock;
pub mod openai;
pub mod pricing;
pub mod traits;

pub use mock::ScriptedLlmClient;
pub use openai::OpenAiClient;
pub use pricing::{ModelPrice, PriceTable, PricingLookup};
pub use traits::{CompletionRequest, LlmClient, LlmError, ModelReply, ReplyContent, TokenUsage};
