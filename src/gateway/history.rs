//! 历史格式化：把会话历史与当前问题拼成一条提示词

use crate::memory::{Message, Role};

/// 可替换的格式化策略
pub trait HistoryFormatter: Send + Sync {
    fn format(&self, history: &[Message], current_query: &str) -> String;
}

/// 默认格式：带角色标签的对话记录 + 当前问题；system 消息不输出
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHistoryFormatter;

impl HistoryFormatter for DefaultHistoryFormatter {
    fn format(&self, history: &[Message], current_query: &str) -> String {
        if history.is_empty() {
            return current_query.to_string();
        }

        let transcript = history
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| format!("{}: {}", m.role.label(), m.content))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Previous conversation:\n{transcript}\n\
             Please respond to the current user message, taking into account the conversation history above.\n\
             Current user message: {current_query}"
        )
    }
}

impl<F> HistoryFormatter for F
where
    F: Fn(&[Message], &str) -> String + Send + Sync,
{
    fn format(&self, history: &[Message], current_query: &str) -> String {
        self(history, current_query)
    }
}
