//! Application Orchestrator
//!
//! 每个 (recipe, model) 对应一个 Pod，Pod 中每个 recipe 镜像一个容器。
//! 状态机：absent → creating → running → {stopping → stopped, removing → absent}，restart = remove + pull。
//!
//! 对账：
//! - 启动时 `refresh` 按标签收养已存在的 Pod
//! - Pod start/stop/remove 事件增量更新索引
//! - 10s 自调度 ticker 重新计算健康，只在变化时推送

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::wiring::PodBlueprint;
use crate::application::ports::{
    ContainerEnginePort, EngineConnection, EngineError, ImageBuilderPort, ModelStorePort, PodInfo,
    PortMapping, RecipeSourcePort, TaskManagerPort, TaskState,
};
use crate::application::{request_with_tracking, run_tracked, OrchestratorError, WorkloadRuntime};
use crate::domain::labels::{
    app_labels, parse_ports, LABEL_APP_PORTS, LABEL_MODEL_ID, LABEL_MODEL_PORTS, LABEL_RECIPE_ID,
};
use crate::domain::{AppKey, ApplicationOptions, ApplicationState, BuiltImage, Labels, PodHealth};
use crate::infrastructure::events::EventPublisher;
use crate::infrastructure::memory::ApplicationRegistry;
use crate::infrastructure::orchestration::net::get_free_port;
use crate::infrastructure::orchestration::ticker::Ticker;
use crate::infrastructure::pods::{PodEvent, PodManager};

/// 应用编排配置
#[derive(Debug, Clone)]
pub struct ApplicationManagerConfig {
    /// 健康检查周期
    pub health_check_interval: Duration,
    /// 等待容器运行的轮询间隔
    pub container_start_poll: Duration,
    /// 等待容器运行的上限
    pub container_start_timeout: Duration,
}

impl Default for ApplicationManagerConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(10),
            container_start_poll: Duration::from_secs(5),
            container_start_timeout: Duration::from_secs(3600),
        }
    }
}

/// 构建应用所需的外部协作者
#[derive(Clone)]
pub struct ApplicationCollaborators {
    pub recipes: Arc<dyn RecipeSourcePort>,
    pub models: Arc<dyn ModelStorePort>,
    pub builder: Arc<dyn ImageBuilderPort>,
}

/// Pod 是否仍在运行（需要先 stop 再 remove）
fn is_pod_active(status: &str) -> bool {
    matches!(status, "Running" | "Degraded")
}

pub struct ApplicationManager {
    engine: Arc<dyn ContainerEnginePort>,
    pods: Arc<PodManager>,
    tasks: Arc<dyn TaskManagerPort>,
    registry: Arc<ApplicationRegistry>,
    publisher: Arc<EventPublisher>,
    collaborators: ApplicationCollaborators,
    config: ApplicationManagerConfig,
    /// 正在由本编排器停止/删除的 Pod，不生成 "stopped manually" 任务
    protected: DashMap<String, ()>,
    ticker: Mutex<Option<Ticker>>,
    cancel: CancellationToken,
}

impl ApplicationManager {
    pub fn new(
        engine: Arc<dyn ContainerEnginePort>,
        pods: Arc<PodManager>,
        tasks: Arc<dyn TaskManagerPort>,
        registry: Arc<ApplicationRegistry>,
        publisher: Arc<EventPublisher>,
        collaborators: ApplicationCollaborators,
        config: ApplicationManagerConfig,
    ) -> Self {
        Self {
            engine,
            pods,
            tasks,
            registry,
            publisher,
            collaborators,
            config,
            protected: DashMap::new(),
            ticker: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 收养已有 Pod，订阅 Pod 事件并启动健康检查 ticker
    pub async fn init(self: &Arc<Self>) {
        if let Err(e) = self.refresh().await {
            tracing::warn!(error = %e, "Initial application refresh failed");
        }

        let mut events = self.pods.subscribe();
        let manager = self.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) => manager.handle_pod_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Application manager lagged on pod events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        let manager = self.clone();
        let ticker = Ticker::spawn(self.config.health_check_interval, move || {
            let manager = manager.clone();
            async move { manager.check_pods_health().await }
        });
        if let Ok(mut slot) = self.ticker.lock() {
            *slot = Some(ticker);
        }

        tracing::info!(
            applications = self.registry.len(),
            "Application manager initialized"
        );
    }

    fn notify(&self) {
        self.publisher.publish_applications(self.registry.values());
    }

    /// 收养所有带 recipe-id / model-id 标签的 Pod
    pub async fn refresh(&self) -> Result<(), OrchestratorError> {
        let pods = self
            .pods
            .get_pods_with_labels(&[LABEL_RECIPE_ID, LABEL_MODEL_ID])
            .await?;
        for pod in &pods {
            if let Some(state) = self.adopt(pod).await {
                self.registry.set(state);
            }
        }
        self.notify();
        Ok(())
    }

    /// 由 Pod 记录推导应用状态；缺少必要标签时跳过
    async fn adopt(&self, pod: &PodInfo) -> Option<ApplicationState> {
        let labels = pod.labels.as_ref()?;
        let recipe_id = labels.get(LABEL_RECIPE_ID)?;
        let model_id = labels.get(LABEL_MODEL_ID)?;

        let health = match self.pods.get_health(pod).await {
            Ok(health) => health,
            Err(e) => {
                tracing::warn!(pod_id = %pod.id, error = %e, "Cannot compute pod health");
                PodHealth::Starting
            }
        };

        Some(ApplicationState {
            recipe_id: recipe_id.clone(),
            model_id: model_id.clone(),
            pod_id: pod.id.clone(),
            pod_name: pod.name.clone(),
            engine_id: pod.engine_id.clone(),
            pod_status: pod.status.clone(),
            health,
            app_ports: parse_ports(labels.get(LABEL_APP_PORTS)),
            model_ports: parse_ports(labels.get(LABEL_MODEL_PORTS)),
        })
    }

    async fn handle_pod_event(&self, event: PodEvent) {
        match event {
            PodEvent::Started(pod) => {
                self.protected.remove(&pod.id);
                if let Some(state) = self.adopt(&pod).await {
                    self.registry.set(state);
                    self.notify();
                }
            }
            PodEvent::Stopped(pod) => {
                let Some(mut state) = self.registry.find_by_pod_id(&pod.id) else {
                    return;
                };
                state.pod_status = pod.status.clone();
                self.registry.set(state.clone());
                self.notify();

                if !self.protected.contains_key(&pod.id) {
                    tracing::info!(pod_id = %pod.id, app = %state.key(), "AI App stopped outside of the manager");
                    let mut task = self.tasks.create_task(
                        "AI App stopped manually",
                        TaskState::Error,
                        app_labels(&state.recipe_id, &state.model_id),
                    );
                    task.fail(format!("AI App {} was stopped manually", state.key()));
                    self.tasks.update_task(task);
                }
            }
            PodEvent::Removed(pod_id) => {
                self.protected.remove(&pod_id);
                if let Some(state) = self.registry.find_by_pod_id(&pod_id) {
                    self.registry.delete(&state.key());
                    self.notify();
                }
            }
        }
    }

    /// 重新列出受管 Pod 并计算健康，只在有变化时推送。
    /// 检查期间被删除的应用不会被写回
    pub async fn check_pods_health(&self) {
        let pods = match self
            .pods
            .get_pods_with_labels(&[LABEL_RECIPE_ID, LABEL_MODEL_ID])
            .await
        {
            Ok(pods) => pods,
            Err(e) => {
                tracing::warn!(error = %e, "Pod health check failed");
                return;
            }
        };

        // 只刷新仍在索引中的条目；增删由 Pod 事件与 remove/pull 负责
        let mut changed = false;
        for pod in &pods {
            let Some(observed) = self.adopt(pod).await else {
                continue;
            };
            changed |= self.registry.update_status(
                &observed.key(),
                &observed.pod_id,
                &observed.pod_status,
                observed.health,
            );
        }

        if changed {
            tracing::debug!("Application states changed");
            self.notify();
        }
    }

    /// 拉取并启动应用：清理同一 (recipe, model) 的历史任务后执行完整流程
    pub async fn pull_application(
        &self,
        options: ApplicationOptions,
        labels: Labels,
    ) -> Result<ApplicationState, OrchestratorError> {
        let key = options.key();
        self.tasks
            .delete_by_labels(&app_labels(&key.recipe_id, &key.model_id));
        self.init_application(options, labels).await
    }

    /// 后台拉取，返回 trackingId
    pub fn request_pull_application(
        self: &Arc<Self>,
        options: ApplicationOptions,
        labels: Labels,
    ) -> String {
        let key = options.key();
        self.tasks
            .delete_by_labels(&app_labels(&key.recipe_id, &key.model_id));

        let mut labels = labels;
        labels.extend(app_labels(&key.recipe_id, &key.model_id));
        let name = format!("Pulling {}", options.recipe.name);
        let manager = self.clone();
        request_with_tracking(self.tasks.clone(), &name, labels, move |labels| async move {
            manager.init_application(options, labels).await?;
            Ok::<_, OrchestratorError>(Labels::new())
        })
    }

    async fn init_application(
        &self,
        options: ApplicationOptions,
        mut labels: Labels,
    ) -> Result<ApplicationState, OrchestratorError> {
        let key = options.key();
        labels.extend(app_labels(&key.recipe_id, &key.model_id));
        let connection = self.engine.connection();
        let tasks = self.tasks.as_ref();

        tracing::info!(app = %key, recipe = %options.recipe.name, "Pulling AI App");

        let recipe_dir = run_tracked(
            tasks,
            "Checking out recipe repository",
            &labels,
            self.collaborators.recipes.checkout(&options.recipe, &labels),
        )
        .await?;

        let model_path = match options.requested_model() {
            Some(model) => {
                let local = run_tracked(
                    tasks,
                    &format!("Downloading model {}", model.name),
                    &labels,
                    self.collaborators.models.download(model, &labels),
                )
                .await?;
                let remote = run_tracked(
                    tasks,
                    &format!("Uploading model {}", model.name),
                    &labels,
                    self.collaborators.models.upload(&connection, &local, &labels),
                )
                .await?;
                Some(remote)
            }
            None => None,
        };

        let images = run_tracked(
            tasks,
            "Building AI App images",
            &labels,
            self.collaborators
                .builder
                .build(&connection, &options.recipe, &recipe_dir, &labels),
        )
        .await?;

        self.remove_existing(&key).await?;

        let mut state = run_tracked(
            tasks,
            "Creating AI App",
            &labels,
            self.create_application_pod(&options, &images, model_path.as_deref(), &connection, &labels),
        )
        .await?;

        let pod = run_tracked(
            tasks,
            "Starting AI App",
            &labels,
            self.start_and_wait(&state.pod_id),
        )
        .await?;
        state.pod_status = pod.status;

        self.registry.set(state.clone());
        self.notify();
        tracing::info!(app = %key, pod_id = %state.pod_id, "AI App running");
        Ok(state)
    }

    /// 同一 (recipe, model) 已有 Pod 时先停止并删除
    async fn remove_existing(&self, key: &AppKey) -> Result<(), OrchestratorError> {
        let query = app_labels(&key.recipe_id, &key.model_id);
        let Some(pod) = self.pods.find_pod_by_labels_values(&query).await? else {
            return Ok(());
        };

        tracing::info!(app = %key, pod_id = %pod.id, "Replacing existing AI App pod");
        self.stop_and_remove(&pod).await?;
        self.registry.delete(key);
        self.notify();
        Ok(())
    }

    async fn stop_and_remove(&self, pod: &PodInfo) -> Result<(), OrchestratorError> {
        self.protected.insert(pod.id.clone(), ());
        let result = async {
            if is_pod_active(&pod.status) {
                self.pods.stop_pod(&pod.id).await?;
            }
            self.pods.remove_pod(&pod.id).await
        }
        .await;
        if result.is_err() {
            self.protected.remove(&pod.id);
        }
        Ok(result?)
    }

    async fn allocate_ports(&self, images: &[BuiltImage]) -> Result<Vec<PortMapping>, OrchestratorError> {
        let mut reserved = HashSet::new();
        let mut mappings = Vec::new();
        for image in images {
            for container_port in &image.ports {
                let host_port = get_free_port(&reserved).await.map_err(|e| {
                    OrchestratorError::internal(format!("Cannot allocate local port: {}", e))
                })?;
                reserved.insert(host_port);
                mappings.push(PortMapping {
                    container_port: *container_port,
                    host_port,
                });
            }
        }
        Ok(mappings)
    }

    async fn create_application_pod(
        &self,
        options: &ApplicationOptions,
        images: &[BuiltImage],
        model_path: Option<&Path>,
        connection: &EngineConnection,
        labels: &Labels,
    ) -> Result<ApplicationState, OrchestratorError> {
        let key = options.key();
        let port_mappings = self.allocate_ports(images).await?;
        let suffix = Uuid::new_v4().simple().to_string();
        let pod_name = format!("{}-{}", options.recipe.id, &suffix[..8]);

        let plan = PodBlueprint {
            pod_name: pod_name.clone(),
            recipe: &options.recipe,
            images,
            model: options.model.as_ref(),
            model_path,
            connection,
            labels,
            port_mappings: &port_mappings,
        }
        .plan();

        let pod_id = self.pods.create_pod(plan.pod).await?;
        for mut container in plan.containers {
            container.pod = Some(pod_id.clone());
            let container_id = self.engine.create_container(container).await?;
            tracing::debug!(pod_id = %pod_id, container_id = %container_id, "Container created");
        }

        Ok(ApplicationState {
            recipe_id: key.recipe_id,
            model_id: key.model_id,
            pod_id,
            pod_name,
            engine_id: connection.id.clone(),
            pod_status: "Created".to_string(),
            health: PodHealth::Starting,
            app_ports: plan.app_ports,
            model_ports: plan.model_ports,
        })
    }

    async fn start_and_wait(&self, pod_id: &str) -> Result<PodInfo, OrchestratorError> {
        self.pods.start_pod(pod_id).await?;
        self.wait_containers_running(pod_id).await
    }

    /// 轮询 Pod 内全部容器，直到都进入 running 或超时
    async fn wait_containers_running(&self, pod_id: &str) -> Result<PodInfo, OrchestratorError> {
        let wait = async {
            loop {
                let pod = self.pods.get_pod(pod_id).await?;
                let inspections = join_all(
                    pod.containers
                        .iter()
                        .map(|c| self.engine.inspect_container(&c.id)),
                )
                .await;

                let mut all_running = true;
                for inspection in inspections {
                    all_running &= inspection?.state.running;
                }
                if all_running {
                    return Ok::<_, EngineError>(pod);
                }
                tokio::time::sleep(self.config.container_start_poll).await;
            }
        };

        match tokio::time::timeout(self.config.container_start_timeout, wait).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(OrchestratorError::Timeout(format!(
                "containers of pod {} did not reach running state",
                pod_id
            ))),
        }
    }

    fn state_of(&self, key: &AppKey) -> Result<ApplicationState, OrchestratorError> {
        self.registry
            .get(key)
            .ok_or_else(|| OrchestratorError::not_found("Application", key.to_string()))
    }

    /// 重新读取 Pod 并更新索引
    async fn sync_pod(&self, pod_id: &str) {
        match self.pods.get_pod(pod_id).await {
            Ok(pod) => {
                if let Some(state) = self.adopt(&pod).await {
                    self.registry.set(state);
                    self.notify();
                }
            }
            Err(e) => tracing::warn!(pod_id = %pod_id, error = %e, "Cannot refresh AI App pod"),
        }
    }

    pub async fn stop_application(&self, key: &AppKey) -> Result<(), OrchestratorError> {
        let state = self.state_of(key)?;
        let labels = app_labels(&key.recipe_id, &key.model_id);
        run_tracked(self.tasks.as_ref(), "Stopping AI App", &labels, async {
            self.protected.insert(state.pod_id.clone(), ());
            let result = self.pods.stop_pod(&state.pod_id).await;
            if result.is_err() {
                self.protected.remove(&state.pod_id);
            }
            result
        })
        .await?;
        self.sync_pod(&state.pod_id).await;
        Ok(())
    }

    pub async fn start_application(&self, key: &AppKey) -> Result<(), OrchestratorError> {
        let state = self.state_of(key)?;
        let labels = app_labels(&key.recipe_id, &key.model_id);
        run_tracked(
            self.tasks.as_ref(),
            "Starting AI App",
            &labels,
            self.start_and_wait(&state.pod_id),
        )
        .await?;
        self.sync_pod(&state.pod_id).await;
        Ok(())
    }

    pub async fn remove_application(&self, key: &AppKey) -> Result<(), OrchestratorError> {
        let state = self.state_of(key)?;
        let labels = app_labels(&key.recipe_id, &key.model_id);
        run_tracked(self.tasks.as_ref(), "Removing AI App", &labels, async {
            match self.pods.get_pod(&state.pod_id).await {
                Ok(pod) => self.stop_and_remove(&pod).await,
                // 已经被删除，只需清理索引
                Err(EngineError::NotFound(_)) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await?;
        self.registry.delete(key);
        self.notify();
        Ok(())
    }

    /// remove + pull
    pub async fn restart_application(
        &self,
        options: ApplicationOptions,
        labels: Labels,
    ) -> Result<ApplicationState, OrchestratorError> {
        let key = options.key();
        if self.registry.has(&key) {
            self.remove_application(&key).await?;
        }
        self.pull_application(options, labels).await
    }

    pub fn request_restart_application(
        self: &Arc<Self>,
        options: ApplicationOptions,
        labels: Labels,
    ) -> String {
        let key = options.key();
        self.tasks
            .delete_by_labels(&app_labels(&key.recipe_id, &key.model_id));

        let mut labels = labels;
        labels.extend(app_labels(&key.recipe_id, &key.model_id));
        let name = format!("Restarting {}", options.recipe.name);
        let manager = self.clone();
        request_with_tracking(self.tasks.clone(), &name, labels, move |labels| async move {
            if manager.registry.has(&key) {
                manager.remove_application(&key).await?;
            }
            manager.init_application(options, labels).await?;
            Ok::<_, OrchestratorError>(Labels::new())
        })
    }

    /// 应用（非模型服务）映射到本地的端口
    pub fn get_application_ports(&self, key: &AppKey) -> Result<Vec<u16>, OrchestratorError> {
        Ok(self.state_of(key)?.app_ports)
    }

    pub fn get_applications(&self) -> Vec<ApplicationState> {
        self.registry.values()
    }

    pub fn dispose(&self) {
        self.cancel.cancel();
        if let Ok(mut slot) = self.ticker.lock() {
            if let Some(ticker) = slot.take() {
                ticker.stop();
            }
        }
        self.protected.clear();
    }
}

#[async_trait]
impl WorkloadRuntime for ApplicationManager {
    type Config = ApplicationOptions;
    type Workload = ApplicationState;
    type Key = AppKey;

    async fn create(&self, config: ApplicationOptions) -> Result<ApplicationState, OrchestratorError> {
        self.pull_application(config, Labels::new()).await
    }

    fn list(&self) -> Vec<ApplicationState> {
        self.get_applications()
    }

    async fn start(&self, key: &AppKey) -> Result<(), OrchestratorError> {
        self.start_application(key).await
    }

    async fn stop(&self, key: &AppKey) -> Result<(), OrchestratorError> {
        self.stop_application(key).await
    }

    async fn remove(&self, key: &AppKey) -> Result<(), OrchestratorError> {
        self.remove_application(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{ContainerEnginePort, PodInfo, Task, TaskManagerPort};
    use crate::domain::labels::NO_MODEL;
    use crate::domain::{InferenceType, ModelInfo, Recipe, RecipeComponent};
    use crate::infrastructure::adapters::{
        FakeContainerEngine, FakeImageBuilder, FakeModelStore, FakeRecipeSource,
    };
    use crate::infrastructure::events::{ContainerEventBus, UiEvent};
    use crate::infrastructure::memory::InMemoryTaskManager;

    struct Harness {
        engine: Arc<FakeContainerEngine>,
        tasks: Arc<InMemoryTaskManager>,
        publisher: Arc<EventPublisher>,
        recipes: Arc<FakeRecipeSource>,
        models: Arc<FakeModelStore>,
        builder: Arc<FakeImageBuilder>,
        manager: Arc<ApplicationManager>,
    }

    async fn harness_with(models: FakeModelStore) -> Harness {
        let engine = Arc::new(FakeContainerEngine::new());
        let publisher = Arc::new(EventPublisher::new());
        let tasks = Arc::new(InMemoryTaskManager::new(publisher.clone()));
        let bus = ContainerEventBus::new().arc();
        bus.init(engine.clone()).await.unwrap();
        let pods = PodManager::new(engine.clone()).arc();
        pods.init(&bus);

        let recipes = Arc::new(FakeRecipeSource::new());
        let models = Arc::new(models);
        let builder = Arc::new(FakeImageBuilder::new());
        let manager = ApplicationManager::new(
            engine.clone(),
            pods,
            tasks.clone(),
            Arc::new(ApplicationRegistry::new()),
            publisher.clone(),
            ApplicationCollaborators {
                recipes: recipes.clone(),
                models: models.clone(),
                builder: builder.clone(),
            },
            ApplicationManagerConfig {
                health_check_interval: Duration::from_secs(3600),
                container_start_poll: Duration::from_millis(10),
                container_start_timeout: Duration::from_secs(1),
            },
        )
        .arc();

        Harness {
            engine,
            tasks,
            publisher,
            recipes,
            models,
            builder,
            manager,
        }
    }

    async fn harness() -> Harness {
        harness_with(FakeModelStore::new()).await
    }

    fn options(model: ModelInfo) -> ApplicationOptions {
        ApplicationOptions {
            recipe: Recipe {
                id: "chatbot".to_string(),
                name: "ChatBot".to_string(),
                repository: "https://example.com/recipes.git".to_string(),
                reference: None,
                base_path: None,
                components: vec![
                    RecipeComponent {
                        name: "model".to_string(),
                        containerfile: "Containerfile".to_string(),
                        context_dir: "model".to_string(),
                        model_service: true,
                        ports: vec![8001],
                    },
                    RecipeComponent {
                        name: "ui".to_string(),
                        containerfile: "Containerfile".to_string(),
                        context_dir: "app".to_string(),
                        model_service: false,
                        ports: vec![8501],
                    },
                ],
                model_endpoint: None,
            },
            model: Some(model),
        }
    }

    fn remote_model() -> ModelInfo {
        let mut model = ModelInfo::new("granite", InferenceType::LlamaCpp);
        model.url = Some("https://example.com/granite.gguf".to_string());
        model
    }

    /// 等待后台事件处理完成
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn manual_stop_tasks(tasks: &InMemoryTaskManager) -> usize {
        tasks
            .get_tasks()
            .into_iter()
            .filter(|t| t.name == "AI App stopped manually")
            .count()
    }

    #[tokio::test]
    async fn test_model_without_file_uses_sentinel_everywhere() {
        let h = harness().await;
        let state = h
            .manager
            .pull_application(options(remote_model()), Labels::new())
            .await
            .unwrap();

        assert_eq!(state.model_id, NO_MODEL);
        assert_eq!(state.pod_status, "Running");

        let sentinel = |labels: &Labels| labels.get(LABEL_MODEL_ID).map(String::as_str) == Some(NO_MODEL);
        assert!(h.recipes.calls().iter().all(|l| sentinel(l)));
        assert_eq!(h.models.downloads().len(), 1);
        assert!(h.models.downloads().iter().all(|l| sentinel(l)));
        assert!(h.builder.calls().iter().all(|l| sentinel(l)));
        assert!(sentinel(&h.engine.created_pods()[0].labels));

        let tasks = h.tasks.get_tasks();
        assert!(!tasks.is_empty());
        assert!(tasks.iter().all(|t| sentinel(&t.labels)));
    }

    #[tokio::test]
    async fn test_pull_wires_pod_and_containers() {
        let h = harness().await;
        let state = h
            .manager
            .pull_application(options(remote_model()), Labels::new())
            .await
            .unwrap();

        let pods = h.engine.list_pods().await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].containers.len(), 2);
        assert_eq!(state.app_ports.len(), 1);
        assert_eq!(state.model_ports.len(), 1);

        let created = h.engine.created_containers();
        assert_eq!(created[0].mounts[0].destination, "/granite.gguf");
        assert_eq!(created[1].env[0].0, "MODEL_ENDPOINT");
        assert!(created.iter().all(|c| c.pod.as_deref() == Some(state.pod_id.as_str())));
        assert_eq!(h.manager.get_application_ports(&state.key()).unwrap(), state.app_ports);
    }

    #[tokio::test]
    async fn test_pull_replaces_existing_pod() {
        let h = harness().await;
        let first = h
            .manager
            .pull_application(options(remote_model()), Labels::new())
            .await
            .unwrap();
        let second = h
            .manager
            .pull_application(options(remote_model()), Labels::new())
            .await
            .unwrap();
        settle().await;

        assert_ne!(first.pod_id, second.pod_id);
        let pods = h.engine.list_pods().await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].id, second.pod_id);
        assert_eq!(h.manager.get_applications().len(), 1);
        assert_eq!(manual_stop_tasks(&h.tasks), 0);
    }

    #[tokio::test]
    async fn test_external_stop_creates_error_task() {
        let h = harness().await;
        h.manager.init().await;
        let state = h
            .manager
            .pull_application(options(remote_model()), Labels::new())
            .await
            .unwrap();

        h.engine.stop_pod(&state.pod_id).await.unwrap();
        settle().await;

        let stopped = h
            .tasks
            .get_tasks_by_labels(&app_labels("chatbot", NO_MODEL))
            .into_iter()
            .find(|t| t.name == "AI App stopped manually")
            .unwrap();
        assert_eq!(stopped.state, TaskState::Error);
        assert_eq!(
            h.manager.get_applications()[0].pod_status,
            "Exited".to_string()
        );
        h.manager.dispose();
    }

    #[tokio::test]
    async fn test_stop_application_is_protected() {
        let h = harness().await;
        h.manager.init().await;
        let state = h
            .manager
            .pull_application(options(remote_model()), Labels::new())
            .await
            .unwrap();

        h.manager.stop_application(&state.key()).await.unwrap();
        settle().await;

        assert_eq!(manual_stop_tasks(&h.tasks), 0);
        assert_eq!(h.manager.get_applications()[0].pod_status, "Exited");

        h.manager.start_application(&state.key()).await.unwrap();
        settle().await;
        assert_eq!(h.manager.get_applications()[0].pod_status, "Running");
        h.manager.dispose();
    }

    #[tokio::test]
    async fn test_remove_application() {
        let h = harness().await;
        h.manager.init().await;
        let state = h
            .manager
            .pull_application(options(remote_model()), Labels::new())
            .await
            .unwrap();

        h.manager.remove_application(&state.key()).await.unwrap();
        settle().await;

        assert!(h.engine.list_pods().await.unwrap().is_empty());
        assert!(h.manager.get_applications().is_empty());
        assert_eq!(manual_stop_tasks(&h.tasks), 0);

        let missing = h.manager.remove_application(&state.key()).await;
        assert!(matches!(missing, Err(OrchestratorError::NotFound { .. })));
        h.manager.dispose();
    }

    #[tokio::test]
    async fn test_refresh_adopts_labelled_pods() {
        let h = harness().await;
        h.engine.insert_pod(PodInfo {
            id: "pod-1".to_string(),
            engine_id: "fake".to_string(),
            name: "summarizer-pod".to_string(),
            status: "Running".to_string(),
            labels: Some(Labels::from([
                (LABEL_RECIPE_ID.to_string(), "summarizer".to_string()),
                (LABEL_MODEL_ID.to_string(), "granite".to_string()),
                (LABEL_APP_PORTS.to_string(), "8501,8502".to_string()),
                (LABEL_MODEL_PORTS.to_string(), "40001".to_string()),
            ])),
            containers: vec![],
        });
        h.engine.insert_pod(PodInfo {
            id: "pod-2".to_string(),
            engine_id: "fake".to_string(),
            name: "other".to_string(),
            status: "Running".to_string(),
            labels: Some(Labels::from([(
                LABEL_RECIPE_ID.to_string(),
                "orphan".to_string(),
            )])),
            containers: vec![],
        });

        h.manager.refresh().await.unwrap();

        let apps = h.manager.get_applications();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].pod_id, "pod-1");
        assert_eq!(apps[0].app_ports, vec![8501, 8502]);
        assert_eq!(apps[0].model_ports, vec![40001]);
        assert_eq!(apps[0].health, PodHealth::None);
    }

    #[tokio::test]
    async fn test_failed_download_marks_tracking_task_error() {
        let h = harness_with(FakeModelStore::failing()).await;
        let tracking_id = h
            .manager
            .request_pull_application(options(remote_model()), Labels::new());

        let query = Labels::from([(
            crate::domain::labels::LABEL_TRACKING_ID.to_string(),
            tracking_id,
        )]);
        let mut failed = Vec::new();
        for _ in 0..100 {
            failed = h
                .tasks
                .get_tasks_by_labels(&query)
                .into_iter()
                .filter(|t| t.name == "Pulling ChatBot" && t.state == TaskState::Error)
                .collect();
            if !failed.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(failed.len(), 1);
        assert!(failed[0].error.as_deref().unwrap_or_default().contains("unreachable"));
        assert!(h.engine.created_pods().is_empty());
        assert!(h.builder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_health_check_publishes_only_on_change() {
        let h = harness().await;
        let state = h
            .manager
            .pull_application(options(remote_model()), Labels::new())
            .await
            .unwrap();
        settle().await;

        let mut events = h.publisher.subscribe();
        let count_app_events = |events: &mut broadcast::Receiver<UiEvent>| {
            let mut count = 0;
            while let Ok(event) = events.try_recv() {
                if matches!(event, UiEvent::Applications(_)) {
                    count += 1;
                }
            }
            count
        };

        h.manager.check_pods_health().await;
        assert_eq!(count_app_events(&mut events), 0);

        let pod = h.engine.pod(&state.pod_id).unwrap();
        for container in &pod.containers {
            h.engine.set_container_health(&container.id, Some("healthy"));
        }
        h.manager.check_pods_health().await;
        assert_eq!(count_app_events(&mut events), 1);
        assert_eq!(h.manager.get_applications()[0].health, PodHealth::Healthy);

        h.manager.check_pods_health().await;
        assert_eq!(count_app_events(&mut events), 0);
    }

    #[tokio::test]
    async fn test_health_check_does_not_resurrect_removed_application() {
        let h = harness().await;
        let state = h
            .manager
            .pull_application(options(remote_model()), Labels::new())
            .await
            .unwrap();
        settle().await;

        let release = h.engine.hold_next_inspection();
        let manager = h.manager.clone();
        let health_pass = tokio::spawn(async move { manager.check_pods_health().await });
        h.engine.inspection_held().await;

        // 健康检查已列出 Pod 并停在 inspect 上，此时删除应用
        h.manager.remove_application(&state.key()).await.unwrap();
        assert!(h.manager.get_applications().is_empty());

        release.notify_one();
        health_pass.await.unwrap();

        assert!(h.manager.get_applications().is_empty());
        assert!(matches!(
            h.manager.get_application_ports(&state.key()),
            Err(OrchestratorError::NotFound { .. })
        ));
    }

    /// 轮询直到按 trackingId 找到指定名称且已结束的任务
    async fn wait_tracked(
        tasks: &InMemoryTaskManager,
        tracking_id: &str,
        name: &str,
    ) -> Option<Task> {
        let query = Labels::from([(
            crate::domain::labels::LABEL_TRACKING_ID.to_string(),
            tracking_id.to_string(),
        )]);
        for _ in 0..300 {
            let done = tasks
                .get_tasks_by_labels(&query)
                .into_iter()
                .find(|t| t.name == name && t.state != TaskState::Loading);
            if done.is_some() {
                return done;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    #[tokio::test]
    async fn test_start_timeout_fails_pull() {
        let h = harness().await;
        h.engine.stall_image("localhost/chatbot-ui:latest");

        let tracking_id = h
            .manager
            .request_pull_application(options(remote_model()), Labels::new());

        let pulling = wait_tracked(&h.tasks, &tracking_id, "Pulling ChatBot")
            .await
            .unwrap();
        assert_eq!(pulling.state, TaskState::Error);
        assert!(pulling.error.as_deref().unwrap_or_default().contains("Timeout"));

        let starting = wait_tracked(&h.tasks, &tracking_id, "Starting AI App")
            .await
            .unwrap();
        assert_eq!(starting.state, TaskState::Error);
        assert!(starting.error.as_deref().unwrap_or_default().contains("running state"));
        assert!(h.manager.get_applications().is_empty());
    }

    #[tokio::test]
    async fn test_restart_request_clears_previous_tasks() {
        let h = harness().await;
        let key_labels = app_labels("chatbot", NO_MODEL);
        let stale = h
            .tasks
            .create_task("AI App stopped manually", TaskState::Error, key_labels.clone());
        let unrelated = h.tasks.create_task(
            "AI App stopped manually",
            TaskState::Error,
            app_labels("summarizer", NO_MODEL),
        );

        let tracking_id = h
            .manager
            .request_restart_application(options(remote_model()), Labels::new());

        assert!(h.tasks.get_task(&stale.id).is_none());
        assert!(h.tasks.get_task(&unrelated.id).is_some());

        let restarting = wait_tracked(&h.tasks, &tracking_id, "Restarting ChatBot")
            .await
            .unwrap();
        assert_eq!(restarting.state, TaskState::Success);
        assert_eq!(h.manager.get_applications().len(), 1);
    }
}
