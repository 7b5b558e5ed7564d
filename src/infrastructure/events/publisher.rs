//! Event Publisher Implementation
//!
//! UI 通知：每次修改任务、应用索引或推理服务表时，在对应频道推送整个集合（不是 diff），
//! 由 UI 自行对比

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::application::ports::Task;
use crate::domain::{ApplicationState, InferenceServer};

/// 任务频道
pub const CHANNEL_TASKS: &str = "tasks-update";
/// 应用频道
pub const CHANNEL_APPLICATIONS: &str = "applications-update";
/// 推理服务频道
pub const CHANNEL_INFERENCE_SERVERS: &str = "inference-servers-update";

/// UI 事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", content = "data")]
pub enum UiEvent {
    #[serde(rename = "tasks-update")]
    Tasks(Vec<Task>),
    #[serde(rename = "applications-update")]
    Applications(Vec<ApplicationState>),
    #[serde(rename = "inference-servers-update")]
    InferenceServers(Vec<InferenceServer>),
}

impl UiEvent {
    /// 频道名称
    pub fn channel(&self) -> &'static str {
        match self {
            UiEvent::Tasks(_) => CHANNEL_TASKS,
            UiEvent::Applications(_) => CHANNEL_APPLICATIONS,
            UiEvent::InferenceServers(_) => CHANNEL_INFERENCE_SERVERS,
        }
    }
}

/// 事件发布器
pub struct EventPublisher {
    channel: broadcast::Sender<UiEvent>,
}

impl EventPublisher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { channel: tx }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 订阅所有频道
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.channel.subscribe()
    }

    /// 推送任务列表
    pub fn publish_tasks(&self, tasks: Vec<Task>) {
        self.publish(UiEvent::Tasks(tasks));
    }

    /// 推送应用状态列表
    pub fn publish_applications(&self, applications: Vec<ApplicationState>) {
        self.publish(UiEvent::Applications(applications));
    }

    /// 推送推理服务列表
    pub fn publish_inference_servers(&self, servers: Vec<InferenceServer>) {
        self.publish(UiEvent::InferenceServers(servers));
    }

    fn publish(&self, event: UiEvent) {
        let channel = event.channel();
        if let Err(e) = self.channel.send(event) {
            tracing::debug!(
                channel = channel,
                error = %e,
                "Failed to publish event (no receivers)"
            );
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_full_collection() {
        let publisher = EventPublisher::new();
        let mut rx = publisher.subscribe();

        publisher.publish_inference_servers(vec![]);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.channel(), CHANNEL_INFERENCE_SERVERS);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["channel"], "inference-servers-update");
        assert!(json["data"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_publish_without_receivers_is_noop() {
        let publisher = EventPublisher::new();
        publisher.publish_tasks(vec![]);
    }
}
