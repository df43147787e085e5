//! 协议层
//!
//! 多轮会话与任务协议：
//! - **session**: context_id -> 对话历史，按会话串行 merge，过期清理
//! - **history**: 历史 + 当前问题的提示词格式化策略
//! - **message**: send 参数/结果、Envelope 与协议错误码
//! - **task_queue**: 任务表（continuation 与终态校验）
//! - **runtime**: 一次 send 的完整处理流程
//! - **card**: Agent Card 与技能公布
//! - **hub**: axum HTTP 接入（需启用 `serve` feature）

mod card;
mod history;
#[cfg(feature = "serve")]
mod hub;
mod message;
mod runtime;
mod session;
mod task_queue;

pub use card::{card_url, AgentCapabilities, AgentCard, AgentSkill};
pub use history::{DefaultHistoryFormatter, HistoryFormatter};
#[cfg(feature = "serve")]
pub use hub::{router, serve, ServerHandle, AGENT_CARD_PATH};
pub use message::{
    DefaultBody, Envelope, Part, ProtocolError, SendParams, SendResult, TaskIdParams, TaskStatus,
    UserMessage,
};
pub use runtime::AgentRuntime;
pub use session::{Session, SessionHandle, SessionManager};
pub use task_queue::{Task, TaskId, TaskState, TaskStore};
