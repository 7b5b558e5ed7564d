//! Inference Providers - 推理服务的容器创建策略
//!
//! 每个 provider 负责一种后端：拉取镜像、创建并启动服务容器。
//! 编排器只负责选择 provider 与管理服务生命周期

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::ports::{
    ContainerCreateOptions, ContainerEnginePort, EngineConnection, HealthCheck, MountSpec,
    PortMapping, TaskManagerPort,
};
use crate::application::{run_tracked, OrchestratorError};
use crate::domain::inference::encode_model_ids;
use crate::domain::labels::{LABEL_INFERENCE_BACKEND, LABEL_INFERENCE_SERVER};
use crate::domain::{InferenceServerConfig, InferenceType};

/// 服务在容器内监听的端口
pub const INFERENCE_CONTAINER_PORT: u16 = 8000;

pub const LLAMA_CPP_IMAGE: &str =
    "ghcr.io/containers/podman-desktop-extension-ai-lab-playground-images/ai-lab-playground-chat:0.3.2";
pub const WHISPER_CPP_IMAGE: &str = "quay.io/ai-lab/whispercpp:latest";

/// 一次创建请求
pub struct ProviderRequest<'a> {
    pub config: &'a InferenceServerConfig,
    /// 与 `config.models` 一一对应，模型在执行目标上的路径
    pub model_paths: &'a [PathBuf],
    pub connection: &'a EngineConnection,
}

/// 推理服务 provider
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    fn name(&self) -> &str;

    fn backend(&self) -> InferenceType;

    fn enabled(&self) -> bool {
        true
    }

    /// 拉取镜像、创建并启动容器，返回容器 ID
    async fn perform(&self, request: ProviderRequest<'_>) -> Result<String, OrchestratorError>;
}

/// 基于单个容器镜像的 provider
pub struct ContainerProvider {
    name: String,
    backend: InferenceType,
    image: String,
    enabled: bool,
    engine: Arc<dyn ContainerEnginePort>,
    tasks: Arc<dyn TaskManagerPort>,
}

impl ContainerProvider {
    pub fn new(
        name: impl Into<String>,
        backend: InferenceType,
        image: impl Into<String>,
        engine: Arc<dyn ContainerEnginePort>,
        tasks: Arc<dyn TaskManagerPort>,
    ) -> Self {
        Self {
            name: name.into(),
            backend,
            image: image.into(),
            enabled: true,
            engine,
            tasks,
        }
    }

    pub fn llama_cpp(engine: Arc<dyn ContainerEnginePort>, tasks: Arc<dyn TaskManagerPort>) -> Self {
        Self::new("llama-cpp", InferenceType::LlamaCpp, LLAMA_CPP_IMAGE, engine, tasks)
    }

    pub fn whisper_cpp(engine: Arc<dyn ContainerEnginePort>, tasks: Arc<dyn TaskManagerPort>) -> Self {
        Self::new("whisper-cpp", InferenceType::WhisperCpp, WHISPER_CPP_IMAGE, engine, tasks)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn container_options(&self, request: &ProviderRequest<'_>, image: &str) -> ContainerCreateOptions {
        let config = request.config;
        let mut mounts = Vec::new();
        let mut model_path = None;

        // 每个模型的目录挂载到 /models/<model id>
        for (model, path) in config.models.iter().zip(request.model_paths) {
            let destination = format!("/models/{}", model.id);
            if let Some(dir) = path.parent() {
                mounts.push(MountSpec {
                    source: dir.to_path_buf(),
                    destination: destination.clone(),
                    read_only: true,
                    mode: request.connection.bind_mode().map(|m| m.to_string()),
                });
            }
            if model_path.is_none() {
                let file = path
                    .file_name()
                    .map(|f| f.to_string_lossy().to_string())
                    .unwrap_or_default();
                model_path = Some(format!("{}/{}", destination, file));
            }
        }

        let mut env = vec![
            ("HOST".to_string(), "0.0.0.0".to_string()),
            ("PORT".to_string(), INFERENCE_CONTAINER_PORT.to_string()),
        ];
        if let Some(path) = model_path {
            env.push(("MODEL_PATH".to_string(), path));
        }
        if let Some(model) = config.models.first() {
            env.extend(model.properties_env());
        }

        let mut labels = config.labels.clone();
        labels.insert(
            LABEL_INFERENCE_SERVER.to_string(),
            encode_model_ids(&config.models),
        );
        labels.insert(
            LABEL_INFERENCE_BACKEND.to_string(),
            self.backend.as_str().to_string(),
        );

        let suffix = Uuid::new_v4().simple().to_string();
        ContainerCreateOptions {
            name: format!("{}-{}", self.name, &suffix[..8]),
            image: image.to_string(),
            pod: None,
            env,
            labels,
            mounts,
            port_mappings: vec![PortMapping {
                container_port: INFERENCE_CONTAINER_PORT,
                host_port: config.port,
            }],
            health_check: Some(HealthCheck::http(INFERENCE_CONTAINER_PORT)),
            command: vec![],
        }
    }
}

#[async_trait]
impl InferenceProvider for ContainerProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> InferenceType {
        self.backend
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn perform(&self, request: ProviderRequest<'_>) -> Result<String, OrchestratorError> {
        let image = request.config.image.as_deref().unwrap_or(&self.image);
        let labels = &request.config.labels;

        run_tracked(
            self.tasks.as_ref(),
            &format!("Pulling {}", image),
            labels,
            self.engine.pull_image(image),
        )
        .await?;

        let options = self.container_options(&request, image);
        let container_id = run_tracked(
            self.tasks.as_ref(),
            "Creating container",
            labels,
            self.engine.create_container(options),
        )
        .await?;
        self.engine.start_container(&container_id).await?;

        tracing::info!(
            provider = %self.name,
            container_id = %container_id,
            port = request.config.port,
            "Inference container started"
        );
        Ok(container_id)
    }
}

/// Provider 注册表
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn InferenceProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 默认的 llama.cpp 与 whisper.cpp provider
    pub fn with_defaults(engine: Arc<dyn ContainerEnginePort>, tasks: Arc<dyn TaskManagerPort>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ContainerProvider::llama_cpp(
            engine.clone(),
            tasks.clone(),
        )));
        registry.register(Arc::new(ContainerProvider::whisper_cpp(engine, tasks)));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn InferenceProvider>) {
        self.providers.push(provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn InferenceProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    /// 指定名称时按名称查找，否则选择第一个启用的匹配后端的 provider
    pub fn select(
        &self,
        name: Option<&str>,
        backend: InferenceType,
    ) -> Result<Arc<dyn InferenceProvider>, OrchestratorError> {
        match name {
            Some(name) => {
                let provider = self
                    .get(name)
                    .filter(|p| p.enabled())
                    .ok_or_else(|| OrchestratorError::NoProvider(format!("provider {} is not available", name)))?;
                if provider.backend() != backend {
                    return Err(OrchestratorError::NoProvider(format!(
                        "provider {} does not support {}",
                        name,
                        backend.as_str()
                    )));
                }
                Ok(provider)
            }
            None => self
                .providers
                .iter()
                .find(|p| p.enabled() && p.backend() == backend)
                .cloned()
                .ok_or_else(|| OrchestratorError::NoProvider(backend.as_str().to_string())),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }
}
