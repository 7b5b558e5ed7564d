//! Pod Manager
//!
//! 引擎 Pod 操作的薄封装，提供按标签查询、聚合健康计算，
//! 并把事件总线上的 Pod 生命周期事件解析为完整的 Pod 记录后转发

use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    ContainerEnginePort, EngineError, EngineEvent, PodCreateOptions, PodInfo,
};
use crate::domain::labels::matches_labels;
use crate::domain::{ContainerHealth, Labels, PodHealth};
use crate::infrastructure::events::ContainerEventBus;

/// Pod 生命周期事件
#[derive(Debug, Clone)]
pub enum PodEvent {
    Started(PodInfo),
    Stopped(PodInfo),
    /// Pod 已不存在，只剩 ID
    Removed(String),
}

pub struct PodManager {
    engine: Arc<dyn ContainerEnginePort>,
    events: broadcast::Sender<PodEvent>,
    cancel: CancellationToken,
}

impl PodManager {
    pub fn new(engine: Arc<dyn ContainerEnginePort>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            engine,
            events,
            cancel: CancellationToken::new(),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 开始转发事件总线上的 Pod 事件
    pub fn init(self: &Arc<Self>, bus: &ContainerEventBus) {
        let mut raw = bus.on_pod_event();
        let manager = self.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = raw.recv() => match event {
                        Ok(event) => manager.relay(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Pod event relay lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("Pod event relay stopped");
        });
    }

    async fn relay(&self, event: EngineEvent) {
        let relayed = match event.status.as_str() {
            "remove" => PodEvent::Removed(event.id),
            "start" | "stop" => {
                // 事件不带引擎 ID，重新列一次拿完整记录
                let pod = match self.get_all_pods().await {
                    Ok(pods) => pods.into_iter().find(|p| p.id == event.id),
                    Err(e) => {
                        tracing::warn!(pod_id = %event.id, error = %e, "Failed to resolve pod event");
                        return;
                    }
                };
                let Some(pod) = pod else {
                    tracing::debug!(pod_id = %event.id, "Pod vanished before its event was relayed");
                    return;
                };
                if event.status == "start" {
                    PodEvent::Started(pod)
                } else {
                    PodEvent::Stopped(pod)
                }
            }
            _ => return,
        };
        let _ = self.events.send(relayed);
    }

    /// 订阅 Pod 生命周期事件
    pub fn subscribe(&self) -> broadcast::Receiver<PodEvent> {
        self.events.subscribe()
    }

    pub async fn get_all_pods(&self) -> Result<Vec<PodInfo>, EngineError> {
        self.engine.list_pods().await
    }

    /// 第一个标签同时满足所有键值的 Pod
    pub async fn find_pod_by_labels_values(
        &self,
        query: &Labels,
    ) -> Result<Option<PodInfo>, EngineError> {
        let pods = self.get_all_pods().await?;
        Ok(pods.into_iter().find(|pod| {
            pod.labels
                .as_ref()
                .is_some_and(|labels| matches_labels(labels, query))
        }))
    }

    /// 含有全部指定标签键的 Pod（不比较值）；没有标签字段的 Pod 不计入
    pub async fn get_pods_with_labels(&self, keys: &[&str]) -> Result<Vec<PodInfo>, EngineError> {
        let pods = self.get_all_pods().await?;
        Ok(pods
            .into_iter()
            .filter(|pod| {
                pod.labels
                    .as_ref()
                    .is_some_and(|labels| keys.iter().all(|key| labels.contains_key(*key)))
            })
            .collect())
    }

    /// 并发检查 Pod 内全部容器的健康并归约
    pub async fn get_health(&self, pod: &PodInfo) -> Result<PodHealth, EngineError> {
        let inspections = join_all(
            pod.containers
                .iter()
                .map(|container| self.engine.inspect_container(&container.id)),
        )
        .await;

        let mut healths = Vec::with_capacity(inspections.len());
        for inspection in inspections {
            let inspect = inspection?;
            healths.push(ContainerHealth::from_engine(inspect.state.health.as_deref()));
        }
        Ok(PodHealth::aggregate(healths))
    }

    pub async fn get_pod(&self, pod_id: &str) -> Result<PodInfo, EngineError> {
        self.get_all_pods()
            .await?
            .into_iter()
            .find(|pod| pod.id == pod_id)
            .ok_or_else(|| EngineError::NotFound(pod_id.to_string()))
    }

    pub async fn create_pod(&self, options: PodCreateOptions) -> Result<String, EngineError> {
        self.engine.create_pod(options).await
    }

    pub async fn start_pod(&self, pod_id: &str) -> Result<(), EngineError> {
        self.engine.start_pod(pod_id).await
    }

    pub async fn stop_pod(&self, pod_id: &str) -> Result<(), EngineError> {
        self.engine.stop_pod(pod_id).await
    }

    pub async fn remove_pod(&self, pod_id: &str) -> Result<(), EngineError> {
        self.engine.remove_pod(pod_id).await
    }

    pub fn dispose(&self) {
        self.cancel.cancel();
    }
}
