//! In-Memory Task Manager Implementation

use dashmap::DashMap;
use std::sync::Arc;

use crate::application::ports::{Task, TaskManagerPort, TaskState};
use crate::domain::labels::matches_labels;
use crate::domain::Labels;
use crate::infrastructure::events::EventPublisher;

/// 内存任务管理器
pub struct InMemoryTaskManager {
    /// task_id -> Task
    tasks: DashMap<String, Task>,
    /// UI 通知
    publisher: Arc<EventPublisher>,
}

impl InMemoryTaskManager {
    pub fn new(publisher: Arc<EventPublisher>) -> Self {
        Self {
            tasks: DashMap::new(),
            publisher,
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 推送完整任务列表
    fn notify(&self) {
        self.publisher.publish_tasks(self.get_tasks());
    }
}

impl TaskManagerPort for InMemoryTaskManager {
    fn create_task(&self, name: &str, state: TaskState, labels: Labels) -> Task {
        let task = Task::new(name, state, labels);
        self.tasks.insert(task.id.clone(), task.clone());

        tracing::debug!(task_id = %task.id, name = %task.name, state = ?task.state, "Task created");
        self.notify();
        task
    }

    fn update_task(&self, task: Task) {
        let task_id = task.id.clone();
        match self.tasks.get_mut(&task_id) {
            Some(mut entry) => {
                let old_state = entry.state;
                *entry = task;
                tracing::debug!(
                    task_id = %task_id,
                    old_state = ?old_state,
                    new_state = ?entry.state,
                    "Task updated"
                );
            }
            None => {
                tracing::debug!(task_id = %task_id, "Ignoring update of unknown task");
                return;
            }
        }
        self.notify();
    }

    fn get_task(&self, id: &str) -> Option<Task> {
        self.tasks.get(id).map(|t| t.clone())
    }

    fn get_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.iter().map(|t| t.clone()).collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    fn get_tasks_by_labels(&self, query: &Labels) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| matches_labels(&t.labels, query))
            .map(|t| t.clone())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    fn delete_by_labels(&self, query: &Labels) -> usize {
        let ids: Vec<String> = self
            .tasks
            .iter()
            .filter(|t| matches_labels(&t.labels, query))
            .map(|t| t.key().clone())
            .collect();

        for id in &ids {
            self.tasks.remove(id);
        }

        if !ids.is_empty() {
            tracing::debug!(count = ids.len(), "Tasks deleted by labels");
            self.notify();
        }
        ids.len()
    }
}
