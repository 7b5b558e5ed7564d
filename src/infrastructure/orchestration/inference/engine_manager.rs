//! Inference Orchestrator (容器引擎后端)
//!
//! 服务以容器 ID 为键。状态对账有三个来源，最终都汇聚到幂等的 `update_server_status`：
//! - 开始监视时立即检查一次
//! - 固定 10s 轮询
//! - 事件总线推送的 die / remove
//!
//! 服务处于过渡状态时 `update_server_status` 不做任何事，避免过期的轮询覆盖用户发起的状态切换

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::provider::{ProviderRegistry, ProviderRequest, INFERENCE_CONTAINER_PORT};
use crate::application::ports::{
    ContainerEnginePort, ContainerInfo, EngineError, ModelStorePort, TaskManagerPort,
};
use crate::application::{request_with_tracking, run_tracked, OrchestratorError, WorkloadRuntime};
use crate::domain::inference::parse_model_ids;
use crate::domain::labels::{LABEL_CONTAINER_ID, LABEL_INFERENCE_BACKEND, LABEL_INFERENCE_SERVER};
use crate::domain::{
    common_backend, HealthSnapshot, InferenceServer, InferenceServerConfig,
    InferenceServerStatus, InferenceType, Labels, ServerConnection,
};
use crate::infrastructure::events::{ContainerEventBus, EventPublisher};
use crate::infrastructure::orchestration::net::get_free_port;

/// 引擎后端配置
#[derive(Debug, Clone)]
pub struct EngineInferenceConfig {
    /// 容器状态轮询间隔
    pub status_poll: Duration,
    /// 初始化与收到外部启动事件时的刷新重试次数
    pub refresh_retries: u32,
    pub retry_base_delay: Duration,
    /// 重试延迟的随机抖动上限
    pub retry_jitter: Duration,
}

impl Default for EngineInferenceConfig {
    fn default() -> Self {
        Self {
            status_poll: Duration::from_secs(10),
            refresh_retries: 3,
            retry_base_delay: Duration::from_millis(2000),
            retry_jitter: Duration::from_millis(1000),
        }
    }
}

pub struct EngineInferenceManager {
    engine: Arc<dyn ContainerEnginePort>,
    bus: Arc<ContainerEventBus>,
    tasks: Arc<dyn TaskManagerPort>,
    publisher: Arc<EventPublisher>,
    providers: Arc<ProviderRegistry>,
    models: Arc<dyn ModelStorePort>,
    config: EngineInferenceConfig,
    /// container_id -> server
    servers: DashMap<String, InferenceServer>,
    /// container_id -> 监视任务
    watchers: DashMap<String, CancellationToken>,
    initialized: AtomicBool,
    cancel: CancellationToken,
}

impl EngineInferenceManager {
    pub fn new(
        engine: Arc<dyn ContainerEnginePort>,
        bus: Arc<ContainerEventBus>,
        tasks: Arc<dyn TaskManagerPort>,
        publisher: Arc<EventPublisher>,
        providers: Arc<ProviderRegistry>,
        models: Arc<dyn ModelStorePort>,
        config: EngineInferenceConfig,
    ) -> Self {
        Self {
            engine,
            bus,
            tasks,
            publisher,
            providers,
            models,
            config,
            servers: DashMap::new(),
            watchers: DashMap::new(),
            initialized: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 首次刷新，并订阅全局容器启动事件以发现外部启动的服务容器
    pub async fn init(self: &Arc<Self>) {
        self.retryable_refresh(self.config.refresh_retries).await;

        let mut started = self.bus.on_container_started();
        let manager = self.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = started.recv() => match event {
                        Ok(container_id) => {
                            if !manager.servers.contains_key(&container_id) {
                                tracing::debug!(container_id = %container_id, "Unknown container started, refreshing");
                                manager.retryable_refresh(manager.config.refresh_retries).await;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            manager.retryable_refresh(manager.config.refresh_retries).await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn notify(&self) {
        self.publisher.publish_inference_servers(self.get_servers());
    }

    pub fn get_servers(&self) -> Vec<InferenceServer> {
        let mut servers: Vec<InferenceServer> =
            self.servers.iter().map(|s| s.value().clone()).collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        servers
    }

    pub fn get(&self, id: &str) -> Option<InferenceServer> {
        self.servers.get(id).map(|s| s.clone())
    }

    fn retry_delay(&self) -> Duration {
        let jitter_ms = self.config.retry_jitter.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        self.config.retry_base_delay + Duration::from_millis(jitter)
    }

    /// 全量刷新；失败时最多重试 `retries` 次，耗尽后清空状态并标记为未初始化
    pub async fn retryable_refresh(self: &Arc<Self>, retries: u32) {
        let mut remaining = retries;
        loop {
            if remaining == 0 {
                tracing::warn!("Inference server refresh retries exhausted, clearing state");
                self.reset();
                return;
            }
            match self.refresh().await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(error = %e, remaining, "Inference server refresh failed");
                }
            }
            remaining -= 1;
            tokio::time::sleep(self.retry_delay()).await;
        }
    }

    /// 后台执行一次有界重试刷新
    fn schedule_refresh(self: &Arc<Self>) {
        let manager = self.clone();
        tokio::spawn(async move { manager.retryable_refresh(1).await });
    }

    fn reset(&self) {
        for watcher in self.watchers.iter() {
            watcher.value().cancel();
        }
        self.watchers.clear();
        self.servers.clear();
        self.initialized.store(false, Ordering::SeqCst);
        self.notify();
    }

    /// 重新列出带推理服务标签的容器并对账
    pub async fn refresh(self: &Arc<Self>) -> Result<(), OrchestratorError> {
        let containers = self.engine.list_containers().await?;
        let mut seen = Vec::new();

        for container in containers
            .iter()
            .filter(|c| c.labels.contains_key(LABEL_INFERENCE_SERVER))
        {
            seen.push(container.id.clone());
            let observed = server_from_container(container);
            match self.servers.get_mut(&container.id) {
                Some(mut existing) => {
                    if !existing.status.is_transitioning() && existing.status != observed.status {
                        existing.set_status(observed.status);
                    }
                    existing.connection = observed.connection;
                    existing.models = observed.models;
                }
                None => {
                    self.servers.insert(container.id.clone(), observed);
                }
            }
        }

        let stale: Vec<String> = self
            .servers
            .iter()
            .map(|s| s.key().clone())
            .filter(|id| !seen.contains(id))
            .collect();
        for id in stale {
            self.servers.remove(&id);
            if let Some((_, watcher)) = self.watchers.remove(&id) {
                watcher.cancel();
            }
        }

        for id in &seen {
            self.watch_container_status(id);
        }

        self.initialized.store(true, Ordering::SeqCst);
        self.notify();
        Ok(())
    }

    /// 开始监视容器；同一容器只会有一个监视任务
    fn watch_container_status(self: &Arc<Self>, container_id: &str) {
        if self.watchers.contains_key(container_id) {
            return;
        }
        let token = self.cancel.child_token();
        self.watchers.insert(container_id.to_string(), token.clone());

        let mut subscription = self.bus.subscribe(container_id);
        let manager = self.clone();
        let id = container_id.to_string();
        let poll = self.config.status_poll;

        tokio::spawn(async move {
            manager.update_server_status(&id).await;
            let mut next_poll = Instant::now() + poll;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep_until(next_poll) => {
                        manager.update_server_status(&id).await;
                        next_poll = Instant::now() + poll;
                    }
                    status = subscription.recv() => match status.as_deref() {
                        Some("die") => manager.update_server_status(&id).await,
                        Some("remove") | None => {
                            manager.forget(&id);
                            break;
                        }
                        Some(_) => {}
                    },
                }
            }
            subscription.dispose();
            tracing::debug!(container_id = %id, "Stopped watching inference container");
        });
    }

    /// 移除服务并停止监视
    fn forget(&self, id: &str) {
        if let Some((_, watcher)) = self.watchers.remove(id) {
            watcher.cancel();
        }
        if self.servers.remove(id).is_some() {
            self.notify();
        }
    }

    /// 按引擎实际状态更新服务；过渡状态下不做任何事
    pub async fn update_server_status(&self, id: &str) {
        match self.servers.get(id) {
            Some(server) if !server.status.is_transitioning() => {}
            _ => return,
        }

        let inspect = match self.engine.inspect_container(id).await {
            Ok(inspect) => inspect,
            Err(EngineError::NotFound(_)) => {
                self.forget(id);
                return;
            }
            Err(e) => {
                tracing::warn!(container_id = %id, error = %e, "Cannot inspect inference container");
                return;
            }
        };

        let changed = {
            let Some(mut server) = self.servers.get_mut(id) else {
                return;
            };
            // 等待期间可能已有用户操作开始
            if server.status.is_transitioning() {
                return;
            }

            let status = if inspect.state.running {
                InferenceServerStatus::Running
            } else {
                InferenceServerStatus::Stopped
            };
            let mut changed = false;
            if server.status != status {
                server.set_status(status);
                changed = true;
            }
            if status == InferenceServerStatus::Running {
                let current = server.health.as_ref().map(|h| h.status.as_str());
                if current != inspect.state.health.as_deref() {
                    server.health = inspect.state.health.as_deref().map(HealthSnapshot::now);
                    changed = true;
                }
            }
            changed
        };

        if changed {
            self.notify();
        }
    }

    /// 后台创建，返回 trackingId；成功后主任务带上 containerId 标签
    pub fn request_create(self: &Arc<Self>, config: InferenceServerConfig) -> String {
        let manager = self.clone();
        let labels = config.labels.clone();
        request_with_tracking(
            self.tasks.clone(),
            "Creating Inference server",
            labels,
            move |labels| async move {
                let mut config = config;
                config.labels = labels;
                let server = manager.create_server(config).await?;
                Ok::<_, OrchestratorError>(Labels::from([(
                    LABEL_CONTAINER_ID.to_string(),
                    server.id,
                )]))
            },
        )
    }

    pub async fn create_server(
        self: &Arc<Self>,
        mut config: InferenceServerConfig,
    ) -> Result<InferenceServer, OrchestratorError> {
        if config.models.is_empty() {
            return Err(OrchestratorError::validation(
                "an inference server needs at least one model",
            ));
        }
        let backend = common_backend(&config.models).ok_or_else(|| {
            OrchestratorError::NoProvider("models use different inference backends".to_string())
        })?;
        let provider = self.providers.select(config.provider_id.as_deref(), backend)?;
        let connection = self.engine.connection();
        if config.port == 0 {
            config.port = get_free_port(&HashSet::new())
                .await
                .map_err(|e| OrchestratorError::internal(format!("cannot allocate port: {}", e)))?;
        }

        let mut model_paths: Vec<PathBuf> = Vec::with_capacity(config.models.len());
        for model in &config.models {
            let local = model.file.as_ref().map(|f| f.full_path()).ok_or_else(|| {
                OrchestratorError::validation(format!("model {} is not available locally", model.id))
            })?;
            let remote = run_tracked(
                self.tasks.as_ref(),
                &format!("Uploading model {}", model.name),
                &config.labels,
                self.models.upload(&connection, &local, &config.labels),
            )
            .await?;
            model_paths.push(remote);
        }

        let container_id = provider
            .perform(ProviderRequest {
                config: &config,
                model_paths: &model_paths,
                connection: &connection,
            })
            .await?;

        let server = InferenceServer {
            id: container_id.clone(),
            engine_id: connection.id.clone(),
            status: InferenceServerStatus::Running,
            health: None,
            models: config.models.iter().map(|m| m.id.clone()).collect(),
            connection: ServerConnection {
                port: config.port,
                host: None,
            },
            backend,
            labels: config.labels.clone(),
        };
        self.servers.insert(container_id.clone(), server.clone());
        self.notify();
        self.watch_container_status(&container_id);

        tracing::info!(container_id = %container_id, provider = %provider.name(), "Inference server created");
        Ok(server)
    }

    /// 检查存在且不在过渡状态后切换到过渡状态，返回原状态
    fn begin_transition(
        &self,
        id: &str,
        status: InferenceServerStatus,
    ) -> Result<InferenceServerStatus, OrchestratorError> {
        let previous = {
            let mut server = self
                .servers
                .get_mut(id)
                .ok_or_else(|| OrchestratorError::not_found("Inference server", id))?;
            if server.status.is_transitioning() {
                return Err(OrchestratorError::Transitioning {
                    id: id.to_string(),
                    status: server.status.as_str(),
                });
            }
            let previous = server.status;
            server.set_status(status);
            previous
        };
        self.notify();
        Ok(previous)
    }

    fn set_status(&self, id: &str, status: InferenceServerStatus) {
        let updated = match self.servers.get_mut(id) {
            Some(mut server) => {
                server.set_status(status);
                true
            }
            None => false,
        };
        if updated {
            self.notify();
        }
    }

    fn fail_operation(self: &Arc<Self>, id: &str, error: EngineError) -> OrchestratorError {
        tracing::error!(container_id = %id, error = %error, "Inference server operation failed");
        self.set_status(id, InferenceServerStatus::Error);
        self.schedule_refresh();
        error.into()
    }

    pub async fn start_server(self: &Arc<Self>, id: &str) -> Result<(), OrchestratorError> {
        self.begin_transition(id, InferenceServerStatus::Starting)?;
        match self.engine.start_container(id).await {
            Ok(()) => {
                self.set_status(id, InferenceServerStatus::Running);
                Ok(())
            }
            Err(e) => Err(self.fail_operation(id, e)),
        }
    }

    pub async fn stop_server(self: &Arc<Self>, id: &str) -> Result<(), OrchestratorError> {
        self.begin_transition(id, InferenceServerStatus::Stopping)?;
        match self.engine.stop_container(id).await {
            Ok(()) => {
                self.set_status(id, InferenceServerStatus::Stopped);
                Ok(())
            }
            Err(e) => Err(self.fail_operation(id, e)),
        }
    }

    pub async fn delete_server(self: &Arc<Self>, id: &str) -> Result<(), OrchestratorError> {
        let previous = self.begin_transition(id, InferenceServerStatus::Deleting)?;
        let result = async {
            if previous == InferenceServerStatus::Running {
                self.engine.stop_container(id).await?;
            }
            self.engine.remove_container(id).await
        }
        .await;

        match result {
            Ok(()) => {
                self.forget(id);
                Ok(())
            }
            Err(e) => Err(self.fail_operation(id, e)),
        }
    }

    pub fn dispose(&self) {
        self.cancel.cancel();
        self.watchers.clear();
    }
}

/// 由容器记录推导服务；model id 标签无法解析时记为空列表
fn server_from_container(container: &ContainerInfo) -> InferenceServer {
    let models = container
        .labels
        .get(LABEL_INFERENCE_SERVER)
        .map(|value| {
            parse_model_ids(value).unwrap_or_else(|e| {
                tracing::warn!(container_id = %container.id, error = %e, "Malformed inference server label");
                Vec::new()
            })
        })
        .unwrap_or_default();

    let port = container
        .ports
        .iter()
        .find(|p| p.container_port == INFERENCE_CONTAINER_PORT)
        .or_else(|| container.ports.first())
        .map(|p| p.host_port)
        .unwrap_or(0);

    let status = if container.is_running() {
        InferenceServerStatus::Running
    } else {
        InferenceServerStatus::Stopped
    };

    InferenceServer {
        id: container.id.clone(),
        engine_id: container.engine_id.clone(),
        status,
        health: None,
        models,
        connection: ServerConnection { port, host: None },
        backend: container
            .labels
            .get(LABEL_INFERENCE_BACKEND)
            .map(|b| InferenceType::from_label(b))
            .unwrap_or_default(),
        labels: container.labels.clone(),
    }
}

#[async_trait]
impl WorkloadRuntime for Arc<EngineInferenceManager> {
    type Config = InferenceServerConfig;
    type Workload = InferenceServer;
    type Key = str;

    async fn create(&self, config: InferenceServerConfig) -> Result<InferenceServer, OrchestratorError> {
        self.create_server(config).await
    }

    fn list(&self) -> Vec<InferenceServer> {
        self.get_servers()
    }

    async fn start(&self, id: &str) -> Result<(), OrchestratorError> {
        self.start_server(id).await
    }

    async fn stop(&self, id: &str) -> Result<(), OrchestratorError> {
        self.stop_server(id).await
    }

    async fn remove(&self, id: &str) -> Result<(), OrchestratorError> {
        self.delete_server(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::TaskState;
    use crate::domain::labels::LABEL_TRACKING_ID;
    use crate::domain::{ModelFile, ModelInfo};
    use crate::infrastructure::adapters::engine::parse_event_line;
    use crate::infrastructure::adapters::{FakeContainerEngine, FakeModelStore};
    use crate::infrastructure::events::UiEvent;
    use crate::infrastructure::memory::InMemoryTaskManager;

    struct Harness {
        engine: Arc<FakeContainerEngine>,
        bus: Arc<ContainerEventBus>,
        tasks: Arc<InMemoryTaskManager>,
        publisher: Arc<EventPublisher>,
        manager: Arc<EngineInferenceManager>,
    }

    async fn harness() -> Harness {
        let engine = Arc::new(FakeContainerEngine::new());
        let publisher = Arc::new(EventPublisher::new());
        let tasks = Arc::new(InMemoryTaskManager::new(publisher.clone()));
        let bus = ContainerEventBus::new().arc();
        bus.init(engine.clone()).await.unwrap();
        let providers = Arc::new(ProviderRegistry::with_defaults(engine.clone(), tasks.clone()));
        let manager = EngineInferenceManager::new(
            engine.clone(),
            bus.clone(),
            tasks.clone(),
            publisher.clone(),
            providers,
            Arc::new(FakeModelStore::new()),
            EngineInferenceConfig {
                status_poll: Duration::from_secs(3600),
                refresh_retries: 3,
                retry_base_delay: Duration::from_millis(1),
                retry_jitter: Duration::from_millis(1),
            },
        )
        .arc();
        Harness {
            engine,
            bus,
            tasks,
            publisher,
            manager,
        }
    }

    fn model(id: &str, backend: InferenceType) -> ModelInfo {
        let mut model = ModelInfo::new(id, backend);
        model.file = Some(ModelFile {
            path: PathBuf::from(format!("/models/{}", id)),
            file: format!("{}.gguf", id),
        });
        model
    }

    fn server_config(models: Vec<ModelInfo>) -> InferenceServerConfig {
        InferenceServerConfig {
            port: 35000,
            provider_id: None,
            image: None,
            labels: Labels::new(),
            models,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn statuses(events: &mut broadcast::Receiver<UiEvent>, id: &str) -> Vec<InferenceServerStatus> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let UiEvent::InferenceServers(servers) = event {
                if let Some(server) = servers.iter().find(|s| s.id == id) {
                    seen.push(server.status);
                }
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_request_create_labels_master_task() {
        let h = harness().await;
        let tracking_id = h
            .manager
            .request_create(server_config(vec![model("granite", InferenceType::LlamaCpp)]));

        let query = Labels::from([(LABEL_TRACKING_ID.to_string(), tracking_id)]);
        let mut master = None;
        for _ in 0..100 {
            master = h
                .tasks
                .get_tasks_by_labels(&query)
                .into_iter()
                .find(|t| t.name == "Creating Inference server" && t.state != TaskState::Loading);
            if master.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let master = master.unwrap();
        assert_eq!(master.state, TaskState::Success);
        let container_id = master.labels.get(LABEL_CONTAINER_ID).unwrap();
        let server = h.manager.get(container_id).unwrap();
        assert_eq!(server.models, vec!["granite".to_string()]);
        assert_eq!(server.connection.port, 35000);
        assert_eq!(server.backend, InferenceType::LlamaCpp);

        // 子任务共享同一个 trackingId
        assert!(h.tasks.get_tasks_by_labels(&query).len() > 1);
        h.manager.dispose();
    }

    #[tokio::test]
    async fn test_mixed_backends_rejected() {
        let h = harness().await;
        let result = h
            .manager
            .create_server(server_config(vec![
                model("granite", InferenceType::LlamaCpp),
                model("whisper", InferenceType::WhisperCpp),
            ]))
            .await;
        assert!(matches!(result, Err(OrchestratorError::NoProvider(_))));
        assert!(h.engine.created_containers().is_empty());
    }

    #[tokio::test]
    async fn test_retryable_refresh_zero_clears_state() {
        let h = harness().await;
        h.manager
            .create_server(server_config(vec![model("granite", InferenceType::LlamaCpp)]))
            .await
            .unwrap();
        h.manager.refresh().await.unwrap();
        assert!(h.manager.is_initialized());

        // 即使引擎可用，也不会再尝试刷新
        h.manager.retryable_refresh(0).await;
        assert!(h.manager.get_servers().is_empty());
        assert!(!h.manager.is_initialized());
    }

    #[tokio::test]
    async fn test_refresh_failures_exhaust_to_empty_state() {
        let h = harness().await;
        h.manager
            .create_server(server_config(vec![model("granite", InferenceType::LlamaCpp)]))
            .await
            .unwrap();
        h.manager.refresh().await.unwrap();

        h.engine.fail("list_containers", "engine unreachable");
        h.manager.retryable_refresh(2).await;
        assert!(h.manager.get_servers().is_empty());
        assert!(!h.manager.is_initialized());
    }

    #[tokio::test]
    async fn test_start_transitions_in_order() {
        let h = harness().await;
        let server = h
            .manager
            .create_server(server_config(vec![model("granite", InferenceType::LlamaCpp)]))
            .await
            .unwrap();
        h.manager.stop_server(&server.id).await.unwrap();
        assert_eq!(h.manager.get(&server.id).unwrap().status, InferenceServerStatus::Stopped);
        settle().await;

        let mut events = h.publisher.subscribe();
        h.manager.start_server(&server.id).await.unwrap();

        let seen = statuses(&mut events, &server.id);
        assert_eq!(
            &seen[..2],
            &[InferenceServerStatus::Starting, InferenceServerStatus::Running]
        );
        let current = h.manager.get(&server.id).unwrap();
        assert_eq!(current.status, InferenceServerStatus::Running);
        assert!(current.health.is_none());
        h.manager.dispose();
    }

    #[tokio::test]
    async fn test_start_failure_sets_error_and_refreshes() {
        let h = harness().await;
        let server = h
            .manager
            .create_server(server_config(vec![model("granite", InferenceType::LlamaCpp)]))
            .await
            .unwrap();
        h.manager.stop_server(&server.id).await.unwrap();
        settle().await;

        h.engine.fail("start_container", "cannot start");
        let mut events = h.publisher.subscribe();
        assert!(h.manager.start_server(&server.id).await.is_err());

        let seen = statuses(&mut events, &server.id);
        assert_eq!(
            &seen[..2],
            &[InferenceServerStatus::Starting, InferenceServerStatus::Error]
        );

        // 有界重试刷新按引擎实际状态恢复
        settle().await;
        assert_eq!(
            h.manager.get(&server.id).unwrap().status,
            InferenceServerStatus::Stopped
        );
        assert!(h.manager.is_initialized());
        h.manager.dispose();
    }

    #[tokio::test]
    async fn test_transitioning_server_rejects_operations() {
        let h = harness().await;
        let server = h
            .manager
            .create_server(server_config(vec![model("granite", InferenceType::LlamaCpp)]))
            .await
            .unwrap();

        h.manager
            .begin_transition(&server.id, InferenceServerStatus::Stopping)
            .unwrap();
        let result = h.manager.stop_server(&server.id).await;
        assert!(matches!(result, Err(OrchestratorError::Transitioning { .. })));
        assert!(h.manager.delete_server(&server.id).await.is_err());

        // 轮询不会覆盖过渡状态
        h.manager.update_server_status(&server.id).await;
        assert_eq!(
            h.manager.get(&server.id).unwrap().status,
            InferenceServerStatus::Stopping
        );

        let missing = h.manager.start_server("missing").await;
        assert!(matches!(missing, Err(OrchestratorError::NotFound { .. })));
        h.manager.dispose();
    }

    #[tokio::test]
    async fn test_update_server_status_tracks_engine() {
        let h = harness().await;
        let server = h
            .manager
            .create_server(server_config(vec![model("granite", InferenceType::LlamaCpp)]))
            .await
            .unwrap();

        h.engine.set_container_health(&server.id, Some("healthy"));
        h.manager.update_server_status(&server.id).await;
        let current = h.manager.get(&server.id).unwrap();
        assert_eq!(current.health.map(|h| h.status), Some("healthy".to_string()));

        h.engine.set_container_state(&server.id, "exited");
        h.manager.update_server_status(&server.id).await;
        assert_eq!(
            h.manager.get(&server.id).unwrap().status,
            InferenceServerStatus::Stopped
        );
        h.manager.dispose();
    }

    #[tokio::test]
    async fn test_remove_event_drops_server() {
        let h = harness().await;
        let server = h
            .manager
            .create_server(server_config(vec![model("granite", InferenceType::LlamaCpp)]))
            .await
            .unwrap();

        h.engine.remove_container(&server.id).await.unwrap();
        settle().await;
        assert!(h.manager.get(&server.id).is_none());
    }

    #[tokio::test]
    async fn test_delete_server_removes_container() {
        let h = harness().await;
        let server = h
            .manager
            .create_server(server_config(vec![model("granite", InferenceType::LlamaCpp)]))
            .await
            .unwrap();

        h.manager.delete_server(&server.id).await.unwrap();
        assert!(h.manager.get_servers().is_empty());
        assert!(h.engine.container(&server.id).is_none());
    }

    #[tokio::test]
    async fn test_malformed_model_label_is_empty() {
        let h = harness().await;
        h.engine.insert_container(ContainerInfo {
            id: "c-broken".to_string(),
            engine_id: "fake".to_string(),
            names: vec!["broken".to_string()],
            image: "llama".to_string(),
            state: "running".to_string(),
            labels: Labels::from([(LABEL_INFERENCE_SERVER.to_string(), "not-json".to_string())]),
            ports: vec![],
            pod_id: None,
        });
        h.engine.insert_container(ContainerInfo {
            id: "c-other".to_string(),
            engine_id: "fake".to_string(),
            names: vec!["other".to_string()],
            image: "nginx".to_string(),
            state: "running".to_string(),
            labels: Labels::new(),
            ports: vec![],
            pod_id: None,
        });

        h.manager.refresh().await.unwrap();
        let servers = h.manager.get_servers();
        assert_eq!(servers.len(), 1);
        assert!(servers[0].models.is_empty());
        assert_eq!(servers[0].backend, InferenceType::None);
        h.manager.dispose();
    }

    #[test]
    fn test_server_from_container_reads_port() {
        let container = ContainerInfo {
            id: "c1".to_string(),
            engine_id: "podman".to_string(),
            names: vec![],
            image: "llama".to_string(),
            state: "exited".to_string(),
            labels: Labels::from([
                (LABEL_INFERENCE_SERVER.to_string(), r#"["a","b"]"#.to_string()),
                (LABEL_INFERENCE_BACKEND.to_string(), "whisper-cpp".to_string()),
            ]),
            ports: vec![crate::application::ports::PortMapping {
                container_port: 8000,
                host_port: 40123,
            }],
            pod_id: None,
        };
        let server = server_from_container(&container);
        assert_eq!(server.status, InferenceServerStatus::Stopped);
        assert_eq!(server.connection.port, 40123);
        assert_eq!(server.models, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(server.backend, InferenceType::WhisperCpp);
    }

    /// libpod 事件流里的一行容器退出事件
    fn libpod_died(container_id: &str) -> crate::application::ports::EngineEvent {
        parse_event_line(&format!(
            r#"{{"ID":"{}","Status":"died","Type":"container","Name":"llama"}}"#,
            container_id
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_libpod_died_event_marks_server_stopped() {
        let h = harness().await;
        let server = h
            .manager
            .create_server(server_config(vec![model("granite", InferenceType::LlamaCpp)]))
            .await
            .unwrap();
        settle().await;

        // 状态变化不伴随事件时，轮询间隔内不会被发现
        h.engine.set_container_state(&server.id, "exited");
        settle().await;
        assert_eq!(
            h.manager.get(&server.id).unwrap().status,
            InferenceServerStatus::Running
        );

        h.bus.dispatch(&libpod_died(&server.id));
        settle().await;
        assert_eq!(
            h.manager.get(&server.id).unwrap().status,
            InferenceServerStatus::Stopped
        );
        h.manager.dispose();
    }

    #[tokio::test]
    async fn test_die_event_ignored_while_stopping() {
        let h = harness().await;
        let server = h
            .manager
            .create_server(server_config(vec![model("granite", InferenceType::LlamaCpp)]))
            .await
            .unwrap();
        settle().await;

        h.manager
            .begin_transition(&server.id, InferenceServerStatus::Stopping)
            .unwrap();
        h.engine.set_container_state(&server.id, "exited");
        h.bus.dispatch(&libpod_died(&server.id));
        settle().await;

        assert_eq!(
            h.manager.get(&server.id).unwrap().status,
            InferenceServerStatus::Stopping
        );
        h.manager.dispose();
    }

    #[tokio::test]
    async fn test_zero_port_gets_allocated() {
        let h = harness().await;
        let mut config = server_config(vec![model("granite", InferenceType::LlamaCpp)]);
        config.port = 0;

        let server = h.manager.create_server(config).await.unwrap();
        assert_ne!(server.connection.port, 0);
        assert_eq!(
            h.engine.created_containers()[0].port_mappings[0].host_port,
            server.connection.port
        );
        h.manager.dispose();
    }
}
