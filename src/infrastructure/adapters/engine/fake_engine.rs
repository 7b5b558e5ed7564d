//! Fake Container Engine - 内存中的容器引擎
//!
//! 不连接任何真实引擎，容器/Pod 状态保存在内存中，并模拟 Podman 的事件顺序。
//! 用于测试以及 `engine.kind = "fake"` 的本地演示

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::application::ports::{
    ContainerCreateOptions, ContainerEnginePort, ContainerInfo, ContainerInspect, ContainerState,
    EngineConnection, EngineError, EngineEvent, PodContainerInfo, PodCreateOptions, PodInfo,
    VmType, EVENT_TYPE_CONTAINER, EVENT_TYPE_POD,
};

#[derive(Debug, Clone)]
struct FakeContainer {
    info: ContainerInfo,
    health: Option<String>,
}

/// Fake Container Engine
pub struct FakeContainerEngine {
    connection: EngineConnection,
    containers: DashMap<String, FakeContainer>,
    pods: DashMap<String, PodInfo>,
    listeners: DashMap<Uuid, mpsc::Sender<EngineEvent>>,
    /// 注入失败的操作名
    failures: DashMap<String, String>,
    pulled_images: Mutex<Vec<String>>,
    created_containers: Mutex<Vec<ContainerCreateOptions>>,
    created_pods: Mutex<Vec<PodCreateOptions>>,
    inspect_gate: Mutex<Option<Arc<Notify>>>,
    inspect_held: Notify,
    /// start_pod 时不会进入 running 的镜像
    stalled_images: DashMap<String, ()>,
}

impl FakeContainerEngine {
    pub fn new() -> Self {
        Self::with_connection(EngineConnection {
            id: "fake".to_string(),
            name: "Fake Engine".to_string(),
            vm_type: VmType::Native,
        })
    }

    pub fn with_connection(connection: EngineConnection) -> Self {
        tracing::info!(engine_id = %connection.id, "FakeContainerEngine initialized");
        Self {
            connection,
            containers: DashMap::new(),
            pods: DashMap::new(),
            listeners: DashMap::new(),
            failures: DashMap::new(),
            pulled_images: Mutex::new(Vec::new()),
            created_containers: Mutex::new(Vec::new()),
            created_pods: Mutex::new(Vec::new()),
            inspect_gate: Mutex::new(None),
            inspect_held: Notify::new(),
            stalled_images: DashMap::new(),
        }
    }

    /// 让指定操作返回错误，直到 `clear_failure`
    pub fn fail(&self, operation: &str, message: &str) {
        self.failures
            .insert(operation.to_string(), message.to_string());
    }

    pub fn clear_failure(&self, operation: &str) {
        self.failures.remove(operation);
    }

    /// 直接放入一个已存在的容器（模拟进程启动前就存在的容器）
    pub fn insert_container(&self, info: ContainerInfo) {
        self.containers.insert(
            info.id.clone(),
            FakeContainer {
                info,
                health: None,
            },
        );
    }

    /// 直接放入一个已存在的 Pod
    pub fn insert_pod(&self, pod: PodInfo) {
        self.pods.insert(pod.id.clone(), pod);
    }

    /// 使用该镜像的容器在 start_pod 后停留在 created（模拟起不来的容器）
    pub fn stall_image(&self, image: &str) {
        self.stalled_images.insert(image.to_string(), ());
    }

    /// 让下一次 inspect_container 停住，直到返回的 Notify 被触发
    pub fn hold_next_inspection(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        if let Ok(mut slot) = self.inspect_gate.lock() {
            *slot = Some(gate.clone());
        }
        gate
    }

    /// 等到被拦下的 inspect 到达闸门
    pub async fn inspection_held(&self) {
        self.inspect_held.notified().await;
    }

    pub fn set_container_health(&self, id: &str, health: Option<&str>) {
        if let Some(mut container) = self.containers.get_mut(id) {
            container.health = health.map(|h| h.to_string());
        }
    }

    pub fn set_container_state(&self, id: &str, state: &str) {
        if let Some(mut container) = self.containers.get_mut(id) {
            container.info.state = state.to_string();
        }
        self.sync_pod_container_status(id, state);
    }

    pub fn container(&self, id: &str) -> Option<ContainerInfo> {
        self.containers.get(id).map(|c| c.info.clone())
    }

    pub fn pod(&self, id: &str) -> Option<PodInfo> {
        self.pods.get(id).map(|p| p.clone())
    }

    pub fn pulled_images(&self) -> Vec<String> {
        self.pulled_images
            .lock()
            .map(|images| images.clone())
            .unwrap_or_default()
    }

    pub fn created_containers(&self) -> Vec<ContainerCreateOptions> {
        self.created_containers
            .lock()
            .map(|created| created.clone())
            .unwrap_or_default()
    }

    pub fn created_pods(&self) -> Vec<PodCreateOptions> {
        self.created_pods
            .lock()
            .map(|created| created.clone())
            .unwrap_or_default()
    }

    /// 向所有事件订阅者推送事件
    pub fn emit(&self, kind: &str, status: &str, id: &str) {
        let event = EngineEvent {
            kind: kind.to_string(),
            status: status.to_string(),
            id: id.to_string(),
        };
        let listeners: Vec<mpsc::Sender<EngineEvent>> =
            self.listeners.iter().map(|l| l.value().clone()).collect();
        for listener in listeners {
            if let Err(e) = listener.try_send(event.clone()) {
                tracing::debug!(error = %e, "Fake engine listener dropped event");
            }
        }
    }

    fn check(&self, operation: &str) -> Result<(), EngineError> {
        match self.failures.get(operation) {
            Some(message) => Err(EngineError::Api {
                status: 500,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn sync_pod_container_status(&self, container_id: &str, state: &str) {
        let pod_id = self
            .containers
            .get(container_id)
            .and_then(|c| c.info.pod_id.clone());
        if let Some(pod_id) = pod_id {
            if let Some(mut pod) = self.pods.get_mut(&pod_id) {
                for container in pod.containers.iter_mut() {
                    if container.id == container_id {
                        container.status = state.to_string();
                    }
                }
            }
        }
    }

    fn set_state_and_emit(&self, id: &str, state: &str, statuses: &[&str]) -> Result<(), EngineError> {
        if !self.containers.contains_key(id) {
            return Err(EngineError::NotFound(id.to_string()));
        }
        self.set_container_state(id, state);
        for status in statuses {
            self.emit(EVENT_TYPE_CONTAINER, status, id);
        }
        Ok(())
    }

    fn pod_container_ids(&self, pod_id: &str) -> Result<Vec<String>, EngineError> {
        self.pods
            .get(pod_id)
            .map(|pod| pod.containers.iter().map(|c| c.id.clone()).collect())
            .ok_or_else(|| EngineError::NotFound(pod_id.to_string()))
    }

    fn set_pod_status(&self, pod_id: &str, status: &str) {
        if let Some(mut pod) = self.pods.get_mut(pod_id) {
            pod.status = status.to_string();
        }
    }
}

impl Default for FakeContainerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerEnginePort for FakeContainerEngine {
    fn connection(&self) -> EngineConnection {
        self.connection.clone()
    }

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, EngineError> {
        self.check("list_containers")?;
        Ok(self.containers.iter().map(|c| c.info.clone()).collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, EngineError> {
        self.check("inspect_container")?;
        let gate = self.inspect_gate.lock().ok().and_then(|mut slot| slot.take());
        if let Some(gate) = gate {
            self.inspect_held.notify_one();
            gate.notified().await;
        }
        let container = self
            .containers
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        Ok(ContainerInspect {
            id: id.to_string(),
            state: ContainerState {
                status: container.info.state.clone(),
                running: container.info.is_running(),
                health: container.health.clone(),
            },
        })
    }

    async fn create_container(
        &self,
        options: ContainerCreateOptions,
    ) -> Result<String, EngineError> {
        self.check("create_container")?;
        let id = Uuid::new_v4().simple().to_string();

        if let Some(pod_id) = &options.pod {
            let mut pod = self
                .pods
                .get_mut(pod_id)
                .ok_or_else(|| EngineError::NotFound(pod_id.clone()))?;
            pod.containers.push(PodContainerInfo {
                id: id.clone(),
                name: options.name.clone(),
                status: "created".to_string(),
            });
        }

        let info = ContainerInfo {
            id: id.clone(),
            engine_id: self.connection.id.clone(),
            names: vec![options.name.clone()],
            image: options.image.clone(),
            state: "created".to_string(),
            labels: options.labels.clone(),
            ports: options.port_mappings.clone(),
            pod_id: options.pod.clone(),
        };
        self.insert_container(info);

        if let Ok(mut created) = self.created_containers.lock() {
            created.push(options);
        }
        self.emit(EVENT_TYPE_CONTAINER, "create", &id);
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.check("start_container")?;
        self.set_state_and_emit(id, "running", &["start"])
    }

    async fn stop_container(&self, id: &str) -> Result<(), EngineError> {
        self.check("stop_container")?;
        self.set_state_and_emit(id, "exited", &["die", "stop"])
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        self.check("remove_container")?;
        let removed = self
            .containers
            .remove(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if let Some(pod_id) = removed.1.info.pod_id {
            if let Some(mut pod) = self.pods.get_mut(&pod_id) {
                pod.containers.retain(|c| c.id != id);
            }
        }
        self.emit(EVENT_TYPE_CONTAINER, "remove", id);
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        self.check("pull_image")?;
        if let Ok(mut pulled) = self.pulled_images.lock() {
            pulled.push(image.to_string());
        }
        Ok(())
    }

    async fn list_pods(&self) -> Result<Vec<PodInfo>, EngineError> {
        self.check("list_pods")?;
        Ok(self.pods.iter().map(|p| p.clone()).collect())
    }

    async fn create_pod(&self, options: PodCreateOptions) -> Result<String, EngineError> {
        self.check("create_pod")?;
        let id = Uuid::new_v4().simple().to_string();
        self.pods.insert(
            id.clone(),
            PodInfo {
                id: id.clone(),
                engine_id: self.connection.id.clone(),
                name: options.name.clone(),
                status: "Created".to_string(),
                labels: Some(options.labels.clone()),
                containers: vec![],
            },
        );
        if let Ok(mut created) = self.created_pods.lock() {
            created.push(options);
        }
        self.emit(EVENT_TYPE_POD, "create", &id);
        Ok(id)
    }

    async fn start_pod(&self, id: &str) -> Result<(), EngineError> {
        self.check("start_pod")?;
        let containers = self.pod_container_ids(id)?;
        for container_id in &containers {
            let stalled = self
                .containers
                .get(container_id)
                .map(|c| self.stalled_images.contains_key(&c.info.image))
                .unwrap_or(false);
            if !stalled {
                self.set_state_and_emit(container_id, "running", &["start"])?;
            }
        }
        self.set_pod_status(id, "Running");
        self.emit(EVENT_TYPE_POD, "start", id);
        Ok(())
    }

    async fn stop_pod(&self, id: &str) -> Result<(), EngineError> {
        self.check("stop_pod")?;
        let containers = self.pod_container_ids(id)?;
        for container_id in &containers {
            self.set_state_and_emit(container_id, "exited", &["die"])?;
        }
        self.set_pod_status(id, "Exited");
        self.emit(EVENT_TYPE_POD, "stop", id);
        Ok(())
    }

    async fn remove_pod(&self, id: &str) -> Result<(), EngineError> {
        self.check("remove_pod")?;
        let containers = self.pod_container_ids(id)?;
        for container_id in &containers {
            self.containers.remove(container_id);
            self.emit(EVENT_TYPE_CONTAINER, "remove", container_id);
        }
        self.pods.remove(id);
        self.emit(EVENT_TYPE_POD, "remove", id);
        Ok(())
    }

    async fn events(&self) -> Result<mpsc::Receiver<EngineEvent>, EngineError> {
        self.check("events")?;
        let (tx, rx) = mpsc::channel(1024);
        self.listeners.insert(Uuid::new_v4(), tx);
        Ok(rx)
    }
}
