//! 任务表
//!
//! task_id -> Task（所属 context、当前状态、最近一次结果），仅存于内存。
//! 未带 task_id 的 send 新建任务；带 task_id 时任务必须存在且不处于终态。
//! 空闲超过超时时间的非 Working 任务在下一次 begin 时清理，超时与会话一致。

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use crate::gateway::message::{ProtocolError, SendResult, TaskStatus};

pub type TaskId = String;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// 正在运行
    Working,
    InputRequired,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::InputRequired => "input_required",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl From<TaskStatus> for TaskState {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Completed => Self::Completed,
            TaskStatus::InputRequired => Self::InputRequired,
            TaskStatus::Failed => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub context_id: String,
    pub state: TaskState,
    /// 最近一次 send 的结果
    pub last_result: Option<SendResult>,
    #[serde(skip)]
    pub last_activity: Instant,
}

impl Task {
    /// 运行中的任务不会过期
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.state != TaskState::Working && self.last_activity.elapsed() > timeout
    }
}

#[derive(Debug)]
pub struct TaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
    timeout: Duration,
}

impl TaskStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 为一次 send 确定任务并置为 Working
    ///
    /// - 无 task_id：新建任务，context_id 缺省时生成新的
    /// - 有 task_id：任务不存在返回 TaskNotFound；已终态或 context 不一致返回 InvalidParams
    pub async fn begin(
        &self,
        task_id: Option<&str>,
        context_id: Option<&str>,
    ) -> Result<Task, ProtocolError> {
        let mut tasks = self.tasks.write().await;
        evict_expired(&mut tasks, self.timeout);

        let Some(task_id) = task_id else {
            let task = Task {
                id: Uuid::new_v4().to_string(),
                context_id: context_id
                    .map(String::from)
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                state: TaskState::Working,
                last_result: None,
                last_activity: Instant::now(),
            };
            tasks.insert(task.id.clone(), task.clone());
            tracing::debug!(task_id = %task.id, context_id = %task.context_id, "Created new task");
            return Ok(task);
        };

        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| ProtocolError::TaskNotFound(task_id.to_string()))?;
        if task.state.is_terminal() {
            return Err(ProtocolError::InvalidParams(format!(
                "task {task_id} is already {}",
                task.state.as_str()
            )));
        }
        if let Some(ctx) = context_id {
            if ctx != task.context_id {
                return Err(ProtocolError::InvalidParams(format!(
                    "task {task_id} belongs to context {}, not {ctx}",
                    task.context_id
                )));
            }
        }
        task.state = TaskState::Working;
        task.last_activity = Instant::now();
        Ok(task.clone())
    }

    /// 记录 send 的结果并更新状态
    pub async fn finish(&self, result: &SendResult) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(&result.task_id) {
            task.state = result.task_status.into();
            task.last_result = Some(result.clone());
            task.last_activity = Instant::now();
        }
    }

    pub async fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().await.get(task_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.tasks.write().await.clear();
    }
}

fn evict_expired(tasks: &mut HashMap<TaskId, Task>, timeout: Duration) {
    let before = tasks.len();
    tasks.retain(|_, task| !task.is_expired(timeout));
    let evicted = before - tasks.len();
    if evicted > 0 {
        tracing::debug!(evicted, live = tasks.len(), "Evicted idle tasks");
    }
}
