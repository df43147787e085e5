//! 记忆层：对话消息模型（会话历史以 Message 序列保存）

pub mod conversation;

pub use conversation::{Message, Role, ToolCallRequest};
