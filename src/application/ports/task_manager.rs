//! Task Manager Port - 长时操作的进度跟踪
//!
//! 任务只通过标签索引：调用方用 `trackingId` 等标签子集查询/批量删除任务

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Labels;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// 进行中
    Loading,
    /// 成功
    Success,
    /// 失败
    Error,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Loading => "loading",
            TaskState::Success => "success",
            TaskState::Error => "error",
        }
    }
}

/// 任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub state: TaskState,
    pub labels: Labels,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 0-100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(name: impl Into<String>, state: TaskState, labels: Labels) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            state,
            labels,
            error: None,
            progress: None,
            created_at: Utc::now(),
        }
    }

    /// 标记成功
    pub fn succeed(&mut self) {
        self.state = TaskState::Success;
        self.error = None;
    }

    /// 标记失败并记录错误
    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = TaskState::Error;
        self.error = Some(error.into());
    }
}

/// Task Manager Port
///
/// 所有操作都不会失败；每次修改都会推送完整任务列表给 UI
pub trait TaskManagerPort: Send + Sync {
    /// 创建任务（分配新 ID）
    fn create_task(&self, name: &str, state: TaskState, labels: Labels) -> Task;

    /// 按 ID 整体替换任务；ID 不存在时忽略
    fn update_task(&self, task: Task);

    /// 按 ID 获取任务
    fn get_task(&self, id: &str) -> Option<Task>;

    /// 所有任务
    fn get_tasks(&self) -> Vec<Task>;

    /// 标签子集匹配查询
    fn get_tasks_by_labels(&self, query: &Labels) -> Vec<Task>;

    /// 按标签批量删除，返回删除数量
    fn delete_by_labels(&self, query: &Labels) -> usize;
}
