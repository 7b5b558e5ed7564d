//! Inference Orchestrator (Kubernetes 后端)
//!
//! 服务以 Pod UID 为键，状态完全由 informer 推送的 Pod 事件推导。
//! 集群内端口不可直达，每个服务额外持有一个本地 port-forward proxy，Pod 删除或 dispose 时销毁

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::provider::{INFERENCE_CONTAINER_PORT, LLAMA_CPP_IMAGE, WHISPER_CPP_IMAGE};
use super::proxy::PortForwardProxy;
use crate::application::ports::{
    ClusterError, ClusterPod, ClusterPort, Container, ContainerPort, EnvVar, ObjectMeta,
    PersistentVolumeClaim, PodSpec, PodWatchEvent, PvcSpec, PvcVolumeSource,
    ResourceRequirements, TaskManagerPort, Volume, VolumeMount,
};
use crate::application::{request_with_tracking, run_tracked, OrchestratorError, WorkloadRuntime};
use crate::domain::labels::{
    cluster_selector, ANNOTATION_LOCAL_PORT, ANNOTATION_MODEL_ID, CLUSTER_SELECTOR_KEY,
    CLUSTER_SELECTOR_VALUE, LABEL_CONTAINER_ID, LABEL_INFERENCE_BACKEND,
};
use crate::domain::{
    common_backend, HealthSnapshot, InferenceServer, InferenceServerConfig,
    InferenceServerStatus, InferenceType, Labels, ModelInfo, ServerConnection,
};
use crate::infrastructure::events::EventPublisher;
use crate::infrastructure::orchestration::net::get_free_port;

const MODELS_VOLUME: &str = "models";
const MODELS_MOUNT: &str = "/models";

/// 集群后端配置
#[derive(Debug, Clone)]
pub struct ClusterInferenceConfig {
    /// watch 流断开后重新建立前的等待
    pub rewatch_delay: Duration,
    /// 模型 PVC 的容量
    pub model_volume_size: String,
    /// init 容器镜像，负责把模型下载进 PVC
    pub downloader_image: String,
}

impl Default for ClusterInferenceConfig {
    fn default() -> Self {
        Self {
            rewatch_delay: Duration::from_secs(2),
            model_volume_size: "10Gi".to_string(),
            downloader_image: "quay.io/curl/curl:latest".to_string(),
        }
    }
}

pub struct ClusterInferenceManager {
    cluster: Arc<dyn ClusterPort>,
    tasks: Arc<dyn TaskManagerPort>,
    publisher: Arc<EventPublisher>,
    config: ClusterInferenceConfig,
    /// uid -> server
    servers: DashMap<String, InferenceServer>,
    /// uid -> pod name
    pod_names: DashMap<String, String>,
    /// uid -> proxy
    proxies: DashMap<String, PortForwardProxy>,
    /// 正在启动 proxy 的 uid
    proxy_pending: DashMap<String, ()>,
    initialized: AtomicBool,
    cancel: CancellationToken,
}

impl ClusterInferenceManager {
    pub fn new(
        cluster: Arc<dyn ClusterPort>,
        tasks: Arc<dyn TaskManagerPort>,
        publisher: Arc<EventPublisher>,
        config: ClusterInferenceConfig,
    ) -> Self {
        Self {
            cluster,
            tasks,
            publisher,
            config,
            servers: DashMap::new(),
            pod_names: DashMap::new(),
            proxies: DashMap::new(),
            proxy_pending: DashMap::new(),
            initialized: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 先建立 watch 再全量 list，避免两者之间的事件丢失
    pub async fn init(self: &Arc<Self>) -> Result<(), OrchestratorError> {
        let events = self.resync().await?;
        self.initialized.store(true, Ordering::SeqCst);

        let manager = self.clone();
        tokio::spawn(async move { manager.run_informer(events).await });

        let context = self.cluster.context();
        tracing::info!(context = %context.name, namespace = %context.namespace, "Cluster inference manager initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// 重新 watch 并 list，清除已不存在的 Pod
    async fn resync(self: &Arc<Self>) -> Result<mpsc::Receiver<PodWatchEvent>, OrchestratorError> {
        let selector = cluster_selector();
        let events = self.cluster.watch_pods(&selector).await?;
        let pods = self.cluster.list_pods(&selector).await?;

        let live: HashSet<String> = pods
            .iter()
            .filter_map(|p| p.uid().map(|uid| uid.to_string()))
            .collect();
        let stale: Vec<String> = self
            .servers
            .iter()
            .filter(|s| !live.contains(s.key()))
            .map(|s| s.key().clone())
            .collect();
        for uid in stale {
            self.drop_pod(&uid);
        }
        for pod in &pods {
            self.apply(pod).await;
        }
        Ok(events)
    }

    async fn run_informer(self: Arc<Self>, mut events: mpsc::Receiver<PodWatchEvent>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        tracing::warn!("Pod watch closed, re-establishing");
                        loop {
                            tokio::select! {
                                _ = self.cancel.cancelled() => return,
                                _ = tokio::time::sleep(self.config.rewatch_delay) => {}
                            }
                            match self.resync().await {
                                Ok(rx) => {
                                    events = rx;
                                    break;
                                }
                                Err(e) => tracing::warn!(error = %e, "Pod watch resync failed"),
                            }
                        }
                    }
                },
            }
        }
        tracing::debug!("Informer stopped");
    }

    async fn handle_event(self: &Arc<Self>, event: PodWatchEvent) {
        match event {
            PodWatchEvent::Added(pod) | PodWatchEvent::Modified(pod) => self.apply(&pod).await,
            PodWatchEvent::Deleted(pod) => {
                if let Some(uid) = pod.uid() {
                    self.drop_pod(uid);
                }
            }
            PodWatchEvent::Error(message) => {
                tracing::warn!(error = %message, "Pod watch error");
            }
        }
    }

    /// 由 Pod 推导服务并确保 proxy 存在
    async fn apply(self: &Arc<Self>, pod: &ClusterPod) {
        let (Some(uid), Some(name)) = (pod.uid(), pod.name()) else {
            tracing::debug!("Skipping pod without uid or name");
            return;
        };
        let mut server = server_from_pod(pod, &self.cluster.context().name);

        // 我们发起的删除在 informer 确认之前保持 deleting
        if let Some(current) = self.servers.get(uid) {
            if current.status == InferenceServerStatus::Deleting {
                server.set_status(InferenceServerStatus::Deleting);
            }
        }

        let changed = self
            .servers
            .get(uid)
            .map(|current| {
                current.status != server.status
                    || current.health.as_ref().map(|h| &h.status)
                        != server.health.as_ref().map(|h| &h.status)
            })
            .unwrap_or(true);
        let status = server.status;
        let port = server.connection.port;
        self.servers.insert(uid.to_string(), server);
        self.pod_names.insert(uid.to_string(), name.to_string());
        if changed {
            tracing::debug!(uid = %uid, status = status.as_str(), "Inference pod updated");
            self.notify();
        }

        if status != InferenceServerStatus::Deleting && port != 0 {
            self.ensure_proxy(uid, name, port).await;
        }
    }

    async fn ensure_proxy(&self, uid: &str, pod_name: &str, port: u16) {
        if self.proxies.contains_key(uid) || self.proxy_pending.insert(uid.to_string(), ()).is_some() {
            return;
        }

        match PortForwardProxy::start(self.cluster.clone(), pod_name, INFERENCE_CONTAINER_PORT, port).await {
            Ok(proxy) => {
                // Pod 在 proxy 启动期间被删除
                if self.servers.contains_key(uid) && !self.cancel.is_cancelled() {
                    self.proxies.insert(uid.to_string(), proxy);
                } else {
                    proxy.destroy();
                }
            }
            Err(e) => {
                tracing::warn!(uid = %uid, port, error = %e, "Cannot start port-forward proxy");
            }
        }
        self.proxy_pending.remove(uid);
    }

    fn drop_pod(&self, uid: &str) {
        let removed = self.servers.remove(uid).is_some();
        self.pod_names.remove(uid);
        if let Some((_, proxy)) = self.proxies.remove(uid) {
            proxy.destroy();
        }
        if removed {
            tracing::info!(uid = %uid, "Inference pod removed");
            self.notify();
        }
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

    /// 当前本地 proxy 接入的连接数
    pub fn proxy_connections(&self, id: &str) -> Option<usize> {
        self.proxies.get(id).map(|p| p.open_connections())
    }

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
        let model = match config.models.as_slice() {
            [] => {
                return Err(OrchestratorError::validation(
                    "an inference server needs at least one model",
                ))
            }
            [model] => model.clone(),
            _ => {
                return Err(OrchestratorError::validation(
                    "a cluster inference server serves a single model",
                ))
            }
        };
        let backend = common_backend(&config.models)
            .ok_or_else(|| OrchestratorError::NoProvider("no models".to_string()))?;
        let image = match (&config.image, backend) {
            (Some(image), _) => image.clone(),
            (None, InferenceType::LlamaCpp) => LLAMA_CPP_IMAGE.to_string(),
            (None, InferenceType::WhisperCpp) => WHISPER_CPP_IMAGE.to_string(),
            (None, InferenceType::None) => {
                return Err(OrchestratorError::NoProvider(backend.as_str().to_string()))
            }
        };
        if model.url.is_none() {
            return Err(OrchestratorError::validation(format!(
                "model {} has no download url",
                model.id
            )));
        }
        if config.port == 0 {
            config.port = get_free_port(&HashSet::new())
                .await
                .map_err(|e| OrchestratorError::internal(format!("cannot allocate port: {}", e)))?;
        }

        let claim_name = volume_name(&model.id);
        run_tracked(
            self.tasks.as_ref(),
            &format!("Creating volume for model {}", model.name),
            &config.labels,
            self.ensure_volume(&claim_name),
        )
        .await?;

        let pod = self.pod_manifest(&config, &model, backend, &image, &claim_name);
        let created = run_tracked(
            self.tasks.as_ref(),
            "Creating inference pod",
            &config.labels,
            self.cluster.create_pod(pod),
        )
        .await?;
        let (Some(uid), Some(name)) = (created.uid(), created.name()) else {
            return Err(OrchestratorError::internal("created pod has no uid"));
        };
        let (uid, name) = (uid.to_string(), name.to_string());

        // informer 可能已经先一步写入
        let server = self
            .servers
            .entry(uid.clone())
            .or_insert_with(|| server_from_pod(&created, &self.cluster.context().name))
            .clone();
        self.pod_names.insert(uid.clone(), name.clone());
        self.notify();
        self.ensure_proxy(&uid, &name, config.port).await;

        tracing::info!(uid = %uid, pod = %name, port = config.port, "Inference pod created");
        Ok(server)
    }

    /// 同名 PVC 已存在时直接复用
    async fn ensure_volume(&self, claim_name: &str) -> Result<(), ClusterError> {
        let pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(claim_name.to_string()),
                labels: Some(Labels::from([(
                    CLUSTER_SELECTOR_KEY.to_string(),
                    CLUSTER_SELECTOR_VALUE.to_string(),
                )])),
                ..Default::default()
            },
            spec: PvcSpec {
                access_modes: vec!["ReadWriteOnce".to_string()],
                resources: ResourceRequirements {
                    requests: Labels::from([(
                        "storage".to_string(),
                        self.config.model_volume_size.clone(),
                    )]),
                },
            },
        };
        match self.cluster.create_pvc(pvc).await {
            Err(ClusterError::Api { status: 409, .. }) => {
                tracing::debug!(claim = %claim_name, "Model volume already exists");
                Ok(())
            }
            other => other,
        }
    }

    fn pod_manifest(
        &self,
        config: &InferenceServerConfig,
        model: &ModelInfo,
        backend: InferenceType,
        image: &str,
        claim_name: &str,
    ) -> ClusterPod {
        let file = model.file_name().unwrap_or_else(|| model.id.clone());
        let model_path = format!("{}/{}", MODELS_MOUNT, file);

        let mut annotations = config.labels.clone();
        annotations.insert(ANNOTATION_MODEL_ID.to_string(), model.id.clone());
        annotations.insert(ANNOTATION_LOCAL_PORT.to_string(), config.port.to_string());
        annotations.insert(LABEL_INFERENCE_BACKEND.to_string(), backend.as_str().to_string());

        let downloader = Container {
            name: "model-downloader".to_string(),
            image: self.config.downloader_image.clone(),
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                r#"[ -f "$MODEL_FILE" ] || curl -fL -o "$MODEL_FILE" "$MODEL_URL""#.to_string(),
            ],
            env: vec![
                EnvVar {
                    name: "MODEL_FILE".to_string(),
                    value: model_path.clone(),
                },
                EnvVar {
                    name: "MODEL_URL".to_string(),
                    value: model.url.clone().unwrap_or_default(),
                },
            ],
            volume_mounts: vec![VolumeMount {
                name: MODELS_VOLUME.to_string(),
                mount_path: MODELS_MOUNT.to_string(),
                read_only: false,
            }],
            ..Default::default()
        };

        let mut env = vec![
            EnvVar {
                name: "HOST".to_string(),
                value: "0.0.0.0".to_string(),
            },
            EnvVar {
                name: "PORT".to_string(),
                value: INFERENCE_CONTAINER_PORT.to_string(),
            },
            EnvVar {
                name: "MODEL_PATH".to_string(),
                value: model_path,
            },
        ];
        env.extend(
            model
                .properties_env()
                .into_iter()
                .map(|(name, value)| EnvVar { name, value }),
        );

        let server = Container {
            name: "inference-server".to_string(),
            image: image.to_string(),
            env,
            ports: vec![ContainerPort {
                container_port: INFERENCE_CONTAINER_PORT,
                name: Some("http".to_string()),
            }],
            volume_mounts: vec![VolumeMount {
                name: MODELS_VOLUME.to_string(),
                mount_path: MODELS_MOUNT.to_string(),
                read_only: true,
            }],
            ..Default::default()
        };

        ClusterPod {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", backend.as_str())),
                labels: Some(Labels::from([(
                    CLUSTER_SELECTOR_KEY.to_string(),
                    CLUSTER_SELECTOR_VALUE.to_string(),
                )])),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(PodSpec {
                init_containers: vec![downloader],
                containers: vec![server],
                volumes: vec![Volume {
                    name: MODELS_VOLUME.to_string(),
                    persistent_volume_claim: Some(PvcVolumeSource {
                        claim_name: claim_name.to_string(),
                    }),
                }],
                restart_policy: Some("Never".to_string()),
            }),
            status: None,
        }
    }

    /// Pod 不可重启
    pub async fn start_server(&self, _id: &str) -> Result<(), OrchestratorError> {
        Err(OrchestratorError::Unsupported(
            "cluster inference servers cannot be started".to_string(),
        ))
    }

    pub async fn stop_server(&self, _id: &str) -> Result<(), OrchestratorError> {
        Err(OrchestratorError::Unsupported(
            "cluster inference servers cannot be stopped".to_string(),
        ))
    }

    /// 删除 Pod；服务与 proxy 由 informer 收到 DELETED 后移除
    pub async fn delete_server(&self, id: &str) -> Result<(), OrchestratorError> {
        {
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
            server.set_status(InferenceServerStatus::Deleting);
        }
        self.notify();

        let Some(name) = self.pod_names.get(id).map(|n| n.clone()) else {
            self.drop_pod(id);
            return Ok(());
        };

        match self.cluster.delete_pod(&name).await {
            Ok(()) => Ok(()),
            Err(ClusterError::NotFound(_)) => {
                self.drop_pod(id);
                Ok(())
            }
            Err(e) => {
                tracing::error!(uid = %id, pod = %name, error = %e, "Cannot delete inference pod");
                if let Some(mut server) = self.servers.get_mut(id) {
                    server.set_status(InferenceServerStatus::Error);
                }
                self.notify();
                Err(e.into())
            }
        }
    }

    pub fn dispose(&self) {
        self.cancel.cancel();
        for proxy in self.proxies.iter() {
            proxy.destroy();
        }
        self.proxies.clear();
    }
}

/// PVC 名称需要满足 DNS-1123
fn volume_name(model_id: &str) -> String {
    let sanitized: String = model_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let trimmed: String = sanitized.trim_matches('-').chars().take(40).collect();
    format!("ai-lab-model-{}", trimmed.trim_end_matches('-'))
}

fn phase_status(phase: Option<&str>) -> InferenceServerStatus {
    match phase {
        Some("Pending") => InferenceServerStatus::Starting,
        Some("Running") => InferenceServerStatus::Running,
        Some("Succeeded") => InferenceServerStatus::Stopped,
        _ => InferenceServerStatus::Error,
    }
}

/// 由 Pod 推导服务：phase 映射状态，deletionTimestamp 优先为 deleting
fn server_from_pod(pod: &ClusterPod, context: &str) -> InferenceServer {
    let status = if pod.metadata.deletion_timestamp.is_some() {
        InferenceServerStatus::Deleting
    } else {
        phase_status(pod.status.as_ref().and_then(|s| s.phase.as_deref()))
    };

    let health = match (status, pod.status.as_ref()) {
        (InferenceServerStatus::Running, Some(pod_status)) if !pod_status.container_statuses.is_empty() => {
            let ready = pod_status.container_statuses.iter().all(|c| c.ready);
            Some(HealthSnapshot::now(if ready { "healthy" } else { "unhealthy" }))
        }
        _ => None,
    };

    let port = match pod.annotation(ANNOTATION_LOCAL_PORT) {
        Some(value) => value.parse::<u16>().unwrap_or_else(|_| {
            tracing::warn!(pod = ?pod.name(), value = %value, "Malformed port annotation");
            0
        }),
        None => 0,
    };

    InferenceServer {
        id: pod.uid().unwrap_or_default().to_string(),
        engine_id: context.to_string(),
        status,
        health,
        models: pod
            .annotation(ANNOTATION_MODEL_ID)
            .map(|id| vec![id.clone()])
            .unwrap_or_default(),
        connection: ServerConnection { port, host: None },
        backend: pod
            .annotation(LABEL_INFERENCE_BACKEND)
            .map(|b| InferenceType::from_label(b))
            .unwrap_or_default(),
        labels: pod.metadata.annotations.clone().unwrap_or_default(),
    }
}

#[async_trait]
impl WorkloadRuntime for Arc<ClusterInferenceManager> {
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
    use crate::application::ports::{ContainerStatus, PodStatus, TaskState};
    use crate::domain::labels::LABEL_TRACKING_ID;
    use crate::infrastructure::adapters::FakeCluster;
    use crate::infrastructure::memory::InMemoryTaskManager;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    struct Harness {
        cluster: Arc<FakeCluster>,
        tasks: Arc<InMemoryTaskManager>,
        manager: Arc<ClusterInferenceManager>,
    }

    async fn harness() -> Harness {
        let cluster = Arc::new(FakeCluster::new());
        let publisher = Arc::new(EventPublisher::new());
        let tasks = Arc::new(InMemoryTaskManager::new(publisher.clone()));
        let manager = ClusterInferenceManager::new(
            cluster.clone(),
            tasks.clone(),
            publisher,
            ClusterInferenceConfig {
                rewatch_delay: Duration::from_millis(10),
                ..Default::default()
            },
        )
        .arc();
        manager.init().await.unwrap();
        Harness {
            cluster,
            tasks,
            manager,
        }
    }

    async fn free_port() -> u16 {
        get_free_port(&HashSet::new()).await.unwrap()
    }

    fn model(id: &str) -> ModelInfo {
        let mut model = ModelInfo::new(id, InferenceType::LlamaCpp);
        model.url = Some(format!("https://models.example.com/{}.gguf", id));
        model
    }

    fn server_config(port: u16, models: Vec<ModelInfo>) -> InferenceServerConfig {
        InferenceServerConfig {
            port,
            provider_id: None,
            image: None,
            labels: Labels::new(),
            models,
        }
    }

    /// 外部创建的受管 Pod
    fn managed_pod(port: u16) -> ClusterPod {
        ClusterPod {
            metadata: ObjectMeta {
                generate_name: Some("external-".to_string()),
                labels: Some(Labels::from([(
                    CLUSTER_SELECTOR_KEY.to_string(),
                    CLUSTER_SELECTOR_VALUE.to_string(),
                )])),
                annotations: Some(Labels::from([
                    (ANNOTATION_MODEL_ID.to_string(), "granite".to_string()),
                    (ANNOTATION_LOCAL_PORT.to_string(), port.to_string()),
                ])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn wait_for<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    fn status_of(manager: &ClusterInferenceManager, id: &str) -> Option<InferenceServerStatus> {
        manager.get(id).map(|s| s.status)
    }

    #[test]
    fn test_phase_mapping() {
        let mut pod = ClusterPod {
            metadata: ObjectMeta {
                uid: Some("u1".to_string()),
                annotations: Some(Labels::from([(
                    ANNOTATION_LOCAL_PORT.to_string(),
                    "35000".to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        let cases = [
            (Some("Pending"), InferenceServerStatus::Starting),
            (Some("Running"), InferenceServerStatus::Running),
            (Some("Succeeded"), InferenceServerStatus::Stopped),
            (Some("Failed"), InferenceServerStatus::Error),
            (Some("Unknown"), InferenceServerStatus::Error),
            (None, InferenceServerStatus::Error),
        ];
        for (phase, expected) in cases {
            pod.status = Some(PodStatus {
                phase: phase.map(|p| p.to_string()),
                container_statuses: vec![],
            });
            assert_eq!(server_from_pod(&pod, "ctx").status, expected, "{:?}", phase);
        }

        pod.metadata.deletion_timestamp = Some("2024-01-01T00:00:00Z".to_string());
        let server = server_from_pod(&pod, "ctx");
        assert_eq!(server.status, InferenceServerStatus::Deleting);
        assert_eq!(server.connection.port, 35000);
        assert_eq!(server.engine_id, "ctx");
    }

    #[test]
    fn test_running_pod_health_and_bad_port() {
        let pod = ClusterPod {
            metadata: ObjectMeta {
                uid: Some("u1".to_string()),
                annotations: Some(Labels::from([(
                    ANNOTATION_LOCAL_PORT.to_string(),
                    "not-a-port".to_string(),
                )])),
                ..Default::default()
            },
            spec: None,
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                container_statuses: vec![ContainerStatus {
                    name: "inference-server".to_string(),
                    ready: false,
                }],
            }),
        };
        let server = server_from_pod(&pod, "ctx");
        assert_eq!(server.health.unwrap().status, "unhealthy");
        assert_eq!(server.connection.port, 0);
        assert!(server.models.is_empty());
    }

    #[test]
    fn test_volume_name_is_dns_safe() {
        assert_eq!(volume_name("ibm/Granite_7B.gguf"), "ai-lab-model-ibm-granite-7b-gguf");
    }

    #[tokio::test]
    async fn test_informer_tracks_external_pod() {
        let h = harness().await;
        let port = free_port().await;
        let created = h.cluster.create_pod(managed_pod(port)).await.unwrap();
        let uid = created.uid().unwrap().to_string();
        let name = created.name().unwrap().to_string();

        assert!(wait_for(|| status_of(&h.manager, &uid) == Some(InferenceServerStatus::Starting)).await);
        assert_eq!(h.manager.get(&uid).unwrap().models, vec!["granite".to_string()]);

        h.cluster.set_phase(&name, "Running");
        assert!(wait_for(|| status_of(&h.manager, &uid) == Some(InferenceServerStatus::Running)).await);

        // proxy 在注解记录的端口上转发
        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        h.cluster.set_phase(&name, "Failed");
        assert!(wait_for(|| status_of(&h.manager, &uid) == Some(InferenceServerStatus::Error)).await);
        h.manager.dispose();
    }

    #[tokio::test]
    async fn test_init_lists_existing_pods() {
        let cluster = Arc::new(FakeCluster::new());
        let created = cluster.create_pod(managed_pod(0)).await.unwrap();
        let publisher = Arc::new(EventPublisher::new());
        let manager = ClusterInferenceManager::new(
            cluster.clone(),
            Arc::new(InMemoryTaskManager::new(publisher.clone())),
            publisher,
            ClusterInferenceConfig::default(),
        )
        .arc();

        manager.init().await.unwrap();
        assert!(manager.is_initialized());
        assert!(manager.get(created.uid().unwrap()).is_some());
        manager.dispose();
    }

    #[tokio::test]
    async fn test_create_server_provisions_volume_and_pod() {
        let h = harness().await;
        let port = free_port().await;
        let server = h
            .manager
            .create_server(server_config(port, vec![model("granite")]))
            .await
            .unwrap();

        assert_eq!(server.status, InferenceServerStatus::Starting);
        assert_eq!(server.connection.port, port);
        assert_eq!(server.backend, InferenceType::LlamaCpp);

        let pvcs = h.cluster.pvcs();
        assert_eq!(pvcs[0].metadata.name.as_deref(), Some("ai-lab-model-granite"));

        let name = h.cluster.pod_names().pop().unwrap();
        let pod = h.cluster.pod(&name).unwrap();
        assert_eq!(pod.annotation(ANNOTATION_MODEL_ID).unwrap(), "granite");
        assert_eq!(pod.annotation(ANNOTATION_LOCAL_PORT).unwrap(), &port.to_string());
        let spec = pod.spec.unwrap();
        assert_eq!(spec.containers[0].image, LLAMA_CPP_IMAGE);
        assert_eq!(spec.init_containers.len(), 1);
        assert_eq!(spec.volumes[0].persistent_volume_claim.as_ref().unwrap().claim_name, "ai-lab-model-granite");

        // 第二次创建复用已存在的 PVC
        h.manager
            .create_server(server_config(free_port().await, vec![model("granite")]))
            .await
            .unwrap();
        assert_eq!(h.cluster.pvcs().len(), 1);

        let stream = TcpStream::connect(("127.0.0.1", port)).await;
        assert!(stream.is_ok());
        h.manager.dispose();
    }

    #[tokio::test]
    async fn test_create_validation() {
        let h = harness().await;
        let no_url = ModelInfo::new("local", InferenceType::LlamaCpp);
        assert!(matches!(
            h.manager.create_server(server_config(0, vec![no_url])).await,
            Err(OrchestratorError::Validation(_))
        ));
        assert!(matches!(
            h.manager.create_server(server_config(0, vec![])).await,
            Err(OrchestratorError::Validation(_))
        ));
        let mut whisper = model("whisper");
        whisper.backend = InferenceType::None;
        assert!(matches!(
            h.manager.create_server(server_config(0, vec![whisper])).await,
            Err(OrchestratorError::NoProvider(_))
        ));
        assert!(h.cluster.pod_names().is_empty());
    }

    #[tokio::test]
    async fn test_request_create_labels_master_task() {
        let h = harness().await;
        let tracking_id = h
            .manager
            .request_create(server_config(free_port().await, vec![model("granite")]));
        let query = Labels::from([(LABEL_TRACKING_ID.to_string(), tracking_id)]);

        assert!(
            wait_for(|| h
                .tasks
                .get_tasks_by_labels(&query)
                .iter()
                .any(|t| t.name == "Creating Inference server" && t.state == TaskState::Success))
            .await
        );
        let master = h
            .tasks
            .get_tasks_by_labels(&query)
            .into_iter()
            .find(|t| t.name == "Creating Inference server")
            .unwrap();
        let uid = master.labels.get(LABEL_CONTAINER_ID).unwrap();
        assert!(h.manager.get(uid).is_some());
        h.manager.dispose();
    }

    #[tokio::test]
    async fn test_start_and_stop_unsupported() {
        let h = harness().await;
        assert!(matches!(
            h.manager.start_server("x").await,
            Err(OrchestratorError::Unsupported(_))
        ));
        assert!(matches!(
            h.manager.stop_server("x").await,
            Err(OrchestratorError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_drops_server_and_proxy() {
        let h = harness().await;
        let port = free_port().await;
        let server = h
            .manager
            .create_server(server_config(port, vec![model("granite")]))
            .await
            .unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client.write_all(b"x").await.unwrap();
        let mut buf = [0u8; 1];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(h.manager.proxy_connections(&server.id), Some(1));

        h.manager.delete_server(&server.id).await.unwrap();
        assert!(wait_for(|| h.manager.get(&server.id).is_none()).await);
        assert!(h.cluster.pod_names().is_empty());

        // 已接入的连接也被关闭
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(client.read(&mut buf).await, Ok(0) | Err(_)));
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());

        assert!(matches!(
            h.manager.delete_server(&server.id).await,
            Err(OrchestratorError::NotFound { .. })
        ));
        h.manager.dispose();
    }

    #[tokio::test]
    async fn test_delete_failure_sets_error() {
        let h = harness().await;
        let server = h
            .manager
            .create_server(server_config(free_port().await, vec![model("granite")]))
            .await
            .unwrap();
        h.cluster.fail("delete_pod", "forbidden");

        assert!(h.manager.delete_server(&server.id).await.is_err());
        assert_eq!(status_of(&h.manager, &server.id), Some(InferenceServerStatus::Error));
        h.manager.dispose();
    }

    #[tokio::test]
    async fn test_rewatch_after_stream_closed() {
        let h = harness().await;
        h.cluster.close_watches();
        assert!(wait_for(|| h.cluster.watcher_count() == 1).await);

        let created = h.cluster.create_pod(managed_pod(0)).await.unwrap();
        let uid = created.uid().unwrap().to_string();
        assert!(wait_for(|| h.manager.get(&uid).is_some()).await);
        h.manager.dispose();
    }

    #[tokio::test]
    async fn test_dispose_destroys_proxies() {
        let h = harness().await;
        let port = free_port().await;
        h.manager
            .create_server(server_config(port, vec![model("granite")]))
            .await
            .unwrap();
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_ok());

        h.manager.dispose();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }
}
