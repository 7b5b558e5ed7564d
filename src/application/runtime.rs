//! Workload Runtime - 编排器共享契约
//!
//! 应用编排器与两个推理编排器都实现 create/list/start/stop/remove；
//! 暴露给 UI 的长时操作统一走 `request_with_tracking`：立即返回 trackingId，调用方按标签轮询任务

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use super::error::OrchestratorError;
use super::ports::{TaskManagerPort, TaskState};
use crate::domain::labels::LABEL_TRACKING_ID;
use crate::domain::Labels;

/// 编排器契约
#[async_trait]
pub trait WorkloadRuntime: Send + Sync {
    type Config: Send + 'static;
    type Workload: Send;
    type Key: ?Sized + Send + Sync;

    async fn create(&self, config: Self::Config) -> Result<Self::Workload, OrchestratorError>;

    fn list(&self) -> Vec<Self::Workload>;

    async fn start(&self, key: &Self::Key) -> Result<(), OrchestratorError>;

    async fn stop(&self, key: &Self::Key) -> Result<(), OrchestratorError>;

    async fn remove(&self, key: &Self::Key) -> Result<(), OrchestratorError>;
}

/// 以 fire-and-forget 方式执行长时操作
///
/// 生成 trackingId 写入标签，创建 loading 状态的主任务后在后台执行 `op`，
/// 完成时主任务转为 success（合并 `op` 返回的额外标签）或 error。
/// 必须在 tokio runtime 内调用
pub fn request_with_tracking<F, Fut>(
    tasks: Arc<dyn TaskManagerPort>,
    name: &str,
    mut labels: Labels,
    op: F,
) -> String
where
    F: FnOnce(Labels) -> Fut,
    Fut: Future<Output = Result<Labels, OrchestratorError>> + Send + 'static,
{
    let tracking_id = Uuid::new_v4().to_string();
    labels.insert(LABEL_TRACKING_ID.to_string(), tracking_id.clone());

    let mut task = tasks.create_task(name, TaskState::Loading, labels.clone());
    let operation = op(labels);

    tokio::spawn(async move {
        match operation.await {
            Ok(extra) => {
                task.labels.extend(extra);
                task.succeed();
            }
            Err(e) => {
                tracing::error!(task_id = %task.id, task = %task.name, error = %e, "Tracked operation failed");
                task.fail(e.to_string());
            }
        }
        tasks.update_task(task);
    });

    tracking_id
}

/// 在当前任务上下文中执行一步操作，并用一个子任务记录其结果
pub async fn run_tracked<T, E, Fut>(
    tasks: &dyn TaskManagerPort,
    name: &str,
    labels: &Labels,
    step: Fut,
) -> Result<T, OrchestratorError>
where
    Fut: Future<Output = Result<T, E>>,
    E: Into<OrchestratorError>,
{
    let mut task = tasks.create_task(name, TaskState::Loading, labels.clone());
    let result = step.await.map_err(Into::into);
    match &result {
        Ok(_) => task.succeed(),
        Err(e) => task.fail(e.to_string()),
    }
    tasks.update_task(task);
    result
}
