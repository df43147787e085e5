//! 会话管理
//!
//! context_id -> 对话历史。会话在首次引用时创建，过期或显式移除时删除，只存在于进程内存中。
//! 每个会话一把 FIFO 公平的 tokio Mutex：同一会话的请求在整个处理流程中持有它，
//! merge 的顺序因此与请求发起顺序一致；不同会话互不阻塞。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;

use crate::core::AgentError;
use crate::gateway::history::{DefaultHistoryFormatter, HistoryFormatter};
use crate::memory::{Message, Role};
use crate::trace::Trace;

/// 单个会话
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub history: Vec<Message>,
    pub created_at: Instant,
    pub last_activity: Instant,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            history: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    /// 把一次运行的 Trace 还原为消息并追加到历史
    ///
    /// 第一条 user 消息必须包含 original_query（否则说明带历史的格式化提示词被当成了原始问题），
    /// 校验通过后把它改写为 original_query 本身，历史中只保存未格式化的问题。
    pub fn merge(&mut self, trace: &Trace, original_query: &str) -> Result<usize, AgentError> {
        let mut messages = trace.spans_to_messages();
        let first_user = messages
            .iter_mut()
            .find(|m| m.role == Role::User)
            .ok_or_else(|| AgentError::ContextIntegrity("no user message found in trace".into()))?;

        if !first_user.content.contains(original_query) {
            return Err(AgentError::ContextIntegrity(format!(
                "original query '{original_query}' not found in first user message"
            )));
        }
        first_user.content = original_query.to_string();

        let added = messages.len();
        self.history.extend(messages);
        self.touch();
        Ok(added)
    }
}

pub type SessionHandle = Arc<Mutex<Session>>;

/// 会话管理器：显式生命周期（服务启动时创建，teardown 清空）
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    timeout: Duration,
    formatter: Arc<dyn HistoryFormatter>,
}

impl SessionManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeout,
            formatter: Arc::new(DefaultHistoryFormatter),
        }
    }

    pub fn from_minutes(minutes: u64) -> Self {
        Self::new(Duration::from_secs(minutes * 60))
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn HistoryFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 先清理所有过期会话，再返回（或新建）context_id 对应的会话
    pub async fn resolve_or_create(&self, context_id: &str) -> SessionHandle {
        let mut sessions = self.sessions.write().await;
        evict_expired(&mut sessions, self.timeout);

        if let Some(handle) = sessions.get(context_id) {
            return Arc::clone(handle);
        }
        let handle = Arc::new(Mutex::new(Session::new(context_id)));
        sessions.insert(context_id.to_string(), Arc::clone(&handle));
        tracing::debug!(context_id = %context_id, live = sessions.len(), "Created new context");
        handle
    }

    /// resolve_or_create 并持有会话锁直到 guard 释放
    pub async fn acquire(&self, context_id: &str) -> OwnedMutexGuard<Session> {
        let handle = self.resolve_or_create(context_id).await;
        let mut guard = handle.lock_owned().await;
        guard.touch();
        guard
    }

    /// 未过期的已有会话
    async fn live(&self, context_id: &str) -> Option<SessionHandle> {
        let handle = self.sessions.read().await.get(context_id).cloned()?;
        let expired = handle.lock().await.is_expired(self.timeout);
        if expired {
            tracing::debug!(context_id = %context_id, "Context expired, removing");
            self.sessions.write().await.remove(context_id);
            return None;
        }
        Some(handle)
    }

    /// 用格式化策略渲染会话历史 + 当前问题
    pub fn render(&self, session: &Session, current_query: &str) -> String {
        self.formatter.format(&session.history, current_query)
    }

    /// 未知或已过期的 context_id 直接返回 current_query
    pub async fn format_prompt(&self, context_id: &str, current_query: &str) -> String {
        match self.live(context_id).await {
            Some(handle) => {
                let mut session = handle.lock().await;
                session.touch();
                self.render(&session, current_query)
            }
            None => current_query.to_string(),
        }
    }

    /// 会话不存在时记录警告并忽略
    pub async fn merge(
        &self,
        context_id: &str,
        trace: &Trace,
        original_query: &str,
    ) -> Result<(), AgentError> {
        let Some(handle) = self.live(context_id).await else {
            tracing::warn!(context_id = %context_id, "Attempted to merge into non-existent context");
            return Ok(());
        };
        let mut session = handle.lock().await;
        session.merge(trace, original_query).map(|_| ())
    }

    pub async fn remove(&self, context_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(context_id).is_some();
        if removed {
            tracing::info!(context_id = %context_id, "Removed context");
        }
        removed
    }

    /// 当前未过期的会话是否存在
    pub async fn contains(&self, context_id: &str) -> bool {
        self.live(context_id).await.is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// 等待所有在用会话释放后清空
    pub async fn teardown(&self) {
        let mut sessions = self.sessions.write().await;
        for handle in sessions.values() {
            drop(handle.lock().await);
        }
        let count = sessions.len();
        sessions.clear();
        tracing::info!(count, "Session manager torn down");
    }
}

/// 跳过正在被请求持有或等待的会话
fn evict_expired(sessions: &mut HashMap<String, SessionHandle>, timeout: Duration) {
    let before = sessions.len();
    sessions.retain(|_, handle| {
        if Arc::strong_count(handle) > 1 {
            return true;
        }
        match handle.try_lock() {
            Ok(session) => !session.is_expired(timeout),
            Err(_) => true,
        }
    });
    let evicted = before - sessions.len();
    if evicted > 0 {
        tracing::info!(evicted, "Cleaned up expired contexts");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{attrs, Span, SpanKind};

    const TIMEOUT: Duration = Duration::from_secs(600);

    fn trace_for(prompt: &str, reply: &str) -> Trace {
        let input = vec![Message::system("You are a helpful assistant."), Message::user(prompt)];
        let mut trace = Trace::new();
        trace.add_span(
            Span::start(SpanKind::ModelCall, "call_llm mock")
                .with_attribute(attrs::INPUT_MESSAGES, serde_json::to_string(&input).unwrap())
                .with_attribute(attrs::OUTPUT, reply),
        )
        .unwrap();
        trace.add_span(Span::start(SpanKind::AgentInvocation, "invoke_agent")).unwrap();
        trace
    }

    #[tokio::test]
    async fn test_merge_rewrites_formatted_query() {
        let manager = SessionManager::new(TIMEOUT);
        manager.resolve_or_create("ctx").await;
        let formatted = "Previous conversation:\nUser: hi\nCurrent user message: What's my name?";
        manager
            .merge("ctx", &trace_for(formatted, "Alice"), "What's my name?")
            .await
            .unwrap();

        let handle = manager.resolve_or_create("ctx").await;
        let session = handle.lock().await;
        assert_eq!(session.history[1], Message::user("What's my name?"));
        assert_eq!(session.history[2], Message::assistant("Alice"));
    }

    #[tokio::test]
    async fn test_merge_integrity_failure() {
        let manager = SessionManager::new(TIMEOUT);
        manager.resolve_or_create("ctx").await;
        let err = manager
            .merge("ctx", &trace_for("Tell me a joke", "..."), "What's my name?")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ContextIntegrity(_)));

        let mut no_user = Trace::new();
        no_user.add_span(Span::start(SpanKind::AgentInvocation, "invoke_agent")).unwrap();
        assert!(manager.merge("ctx", &no_user, "q").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_replaced_and_excluded() {
        let manager = SessionManager::new(TIMEOUT);
        manager.resolve_or_create("old").await;
        manager
            .merge("old", &trace_for("My name is Alice.", "Hi Alice!"), "My name is Alice.")
            .await
            .unwrap();
        assert_ne!(manager.format_prompt("old", "q").await, "q");

        tokio::time::advance(TIMEOUT + Duration::from_secs(1)).await;

        assert_eq!(manager.format_prompt("old", "q").await, "q");
        let handle = manager.resolve_or_create("old").await;
        assert!(handle.lock().await.history.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_evicts_other_expired_sessions() {
        let manager = SessionManager::new(TIMEOUT);
        manager.resolve_or_create("a").await;
        tokio::time::advance(TIMEOUT + Duration::from_secs(1)).await;
        manager.resolve_or_create("b").await;
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_use_session_not_evicted() {
        let manager = SessionManager::new(TIMEOUT);
        let guard = manager.acquire("busy").await;
        tokio::time::advance(TIMEOUT * 2).await;
        manager.resolve_or_create("other").await;
        assert_eq!(manager.len().await, 2);
        drop(guard);
    }

    #[tokio::test]
    async fn test_remove_and_teardown() {
        let manager = SessionManager::new(TIMEOUT);
        manager.resolve_or_create("a").await;
        manager.resolve_or_create("b").await;
        assert!(manager.remove("a").await);
        assert!(!manager.remove("a").await);
        manager.teardown().await;
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_context_format_is_passthrough() {
        let manager = SessionManager::new(TIMEOUT);
        assert_eq!(manager.format_prompt("nope", "hello").await, "hello");
    }
}
