//! Container Event Bus
//!
//! 订阅一次引擎原始事件流，按容器 ID 分发给订阅者，并单独广播容器 start 事件和 Pod 事件

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::{
    ContainerEnginePort, EngineError, EngineEvent, EVENT_TYPE_CONTAINER, EVENT_TYPE_POD,
};

type Subscribers = DashMap<String, Vec<(Uuid, mpsc::UnboundedSender<String>)>>;

/// 单个容器的事件订阅，drop 时只移除自己
pub struct ContainerSubscription {
    id: Uuid,
    container_id: String,
    receiver: mpsc::UnboundedReceiver<String>,
    subscribers: Arc<Subscribers>,
}

impl ContainerSubscription {
    /// 接收下一个原始状态（die / remove ...）；容器被删除后返回 None
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// 显式取消订阅
    pub fn dispose(self) {}
}

impl Drop for ContainerSubscription {
    fn drop(&mut self) {
        let empty = match self.subscribers.get_mut(&self.container_id) {
            Some(mut entry) => {
                entry.retain(|(id, _)| *id != self.id);
                entry.is_empty()
            }
            None => false,
        };
        if empty {
            self.subscribers
                .remove_if(&self.container_id, |_, subs| subs.is_empty());
        }
    }
}

/// 容器事件总线
pub struct ContainerEventBus {
    subscribers: Arc<Subscribers>,
    started: broadcast::Sender<String>,
    pod_events: broadcast::Sender<EngineEvent>,
    cancel: CancellationToken,
}

impl ContainerEventBus {
    pub fn new() -> Self {
        let (started, _) = broadcast::channel(256);
        let (pod_events, _) = broadcast::channel(256);
        Self {
            subscribers: Arc::new(DashMap::new()),
            started,
            pod_events,
            cancel: CancellationToken::new(),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 订阅引擎事件流并开始分发
    pub async fn init(
        self: &Arc<Self>,
        engine: Arc<dyn ContainerEnginePort>,
    ) -> Result<(), EngineError> {
        let mut events = engine.events().await?;
        let bus = self.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            tracing::info!("Container event bus started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => bus.dispatch(&event),
                        None => {
                            tracing::warn!("Engine event stream closed");
                            break;
                        }
                    },
                }
            }
            tracing::info!("Container event bus stopped");
        });

        Ok(())
    }

    /// 分发一个原始事件
    pub fn dispatch(&self, event: &EngineEvent) {
        if event.kind == EVENT_TYPE_POD {
            let _ = self.pod_events.send(event.clone());
            return;
        }
        if event.kind != EVENT_TYPE_CONTAINER {
            return;
        }

        if event.status == "start" {
            let _ = self.started.send(event.id.clone());
        }

        // 先复制发送端再释放分片锁
        let senders: Vec<mpsc::UnboundedSender<String>> = self
            .subscribers
            .get(&event.id)
            .map(|subs| subs.iter().map(|(_, tx)| tx.clone()).collect())
            .unwrap_or_default();

        for tx in &senders {
            let _ = tx.send(event.status.clone());
        }

        // 实体已删除，后续分发无意义
        if event.status == "remove" {
            self.subscribers.remove(&event.id);
        }

        if !senders.is_empty() {
            tracing::debug!(
                container_id = %event.id,
                status = %event.status,
                subscribers = senders.len(),
                "Container event dispatched"
            );
        }
    }

    /// 订阅某个容器的事件
    pub fn subscribe(&self, container_id: &str) -> ContainerSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.subscribers
            .entry(container_id.to_string())
            .or_default()
            .push((id, tx));
        ContainerSubscription {
            id,
            container_id: container_id.to_string(),
            receiver: rx,
            subscribers: self.subscribers.clone(),
        }
    }

    /// 全局容器 start 事件（容器 ID）
    pub fn on_container_started(&self) -> broadcast::Receiver<String> {
        self.started.subscribe()
    }

    /// 原始 Pod 事件
    pub fn on_pod_event(&self) -> broadcast::Receiver<EngineEvent> {
        self.pod_events.subscribe()
    }

    pub fn subscriber_count(&self, container_id: &str) -> usize {
        self.subscribers
            .get(container_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    pub fn dispose(&self) {
        self.cancel.cancel();
        self.subscribers.clear();
    }
}

impl Default for ContainerEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container_event(status: &str, id: &str) -> EngineEvent {
        EngineEvent {
            kind: EVENT_TYPE_CONTAINER.to_string(),
            status: status.to_string(),
            id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_to_subscribers() {
        let bus = ContainerEventBus::new();
        let mut first = bus.subscribe("c1");
        let mut second = bus.subscribe("c1");
        let mut other = bus.subscribe("c2");

        bus.dispatch(&container_event("die", "c1"));

        assert_eq!(first.recv().await.as_deref(), Some("die"));
        assert_eq!(second.recv().await.as_deref(), Some("die"));
        assert!(other.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_drops_all_subscribers() {
        let bus = ContainerEventBus::new();
        let mut sub = bus.subscribe("c1");
        let _sub2 = bus.subscribe("c1");

        bus.dispatch(&container_event("remove", "c1"));

        assert_eq!(sub.recv().await.as_deref(), Some("remove"));
        assert_eq!(bus.subscriber_count("c1"), 0);
        // 发送端已全部丢弃
        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn test_dispose_removes_only_one_callback() {
        let bus = ContainerEventBus::new();
        let first = bus.subscribe("c1");
        let _second = bus.subscribe("c1");
        assert_eq!(bus.subscriber_count("c1"), 2);

        first.dispose();
        assert_eq!(bus.subscriber_count("c1"), 1);
    }

    #[tokio::test]
    async fn test_start_event_is_broadcast() {
        let bus = ContainerEventBus::new();
        let mut started = bus.on_container_started();

        bus.dispatch(&container_event("start", "c9"));
        bus.dispatch(&EngineEvent {
            kind: "image".to_string(),
            status: "start".to_string(),
            id: "img".to_string(),
        });

        assert_eq!(started.recv().await.unwrap(), "c9");
        assert!(started.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pod_events_are_relayed() {
        let bus = ContainerEventBus::new();
        let mut pods = bus.on_pod_event();

        bus.dispatch(&EngineEvent {
            kind: EVENT_TYPE_POD.to_string(),
            status: "stop".to_string(),
            id: "pod-1".to_string(),
        });

        let event = pods.recv().await.unwrap();
        assert_eq!(event.status, "stop");
        assert_eq!(event.id, "pod-1");
    }
}
