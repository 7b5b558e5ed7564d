//! AI Lab - 本地 AI 工作负载编排服务
//!
//! 启动顺序：配置 → 日志 → 适配器 → 事件总线 → Pod 管理 → 应用编排 → 推理编排 → HTTP

use std::sync::Arc;
use std::time::Duration;

use ailab::application::{
    ClusterPort, ContainerEnginePort, ImageBuilderPort, ModelStorePort, RecipeSourcePort,
    TaskManagerPort,
};
use ailab::config::{load_config, print_config, AppConfig, EngineKind, InferenceBackendKind};
use ailab::infrastructure::adapters::{
    FakeCluster, FakeContainerEngine, FakeImageBuilder, FakeModelStore, FakeRecipeSource,
    GitRecipeSource, KubeClient, KubeClientConfig, LocalModelStore, PodmanClient,
    PodmanClientConfig, PodmanImageBuilder,
};
use ailab::infrastructure::events::{ContainerEventBus, EventPublisher};
use ailab::infrastructure::http::{AppState, HttpServer, ServerConfig};
use ailab::infrastructure::memory::{ApplicationRegistry, InMemoryTaskManager};
use ailab::infrastructure::orchestration::{
    ApplicationCollaborators, ApplicationManager, ApplicationManagerConfig,
    ClusterInferenceConfig, ClusterInferenceManager, EngineInferenceConfig,
    EngineInferenceManager, InferenceOrchestrator, ProviderRegistry,
};
use ailab::infrastructure::pods::PodManager;

/// 按 engine.kind 选择的适配器
struct Adapters {
    engine: Arc<dyn ContainerEnginePort>,
    recipes: Arc<dyn RecipeSourcePort>,
    models: Arc<dyn ModelStorePort>,
    builder: Arc<dyn ImageBuilderPort>,
}

fn build_adapters(config: &AppConfig) -> anyhow::Result<Adapters> {
    let adapters = match config.engine.kind {
        EngineKind::Podman => {
            let engine = PodmanClient::new(PodmanClientConfig {
                base_url: config.engine.url.clone(),
                connection_name: config.engine.connection_name.clone(),
                vm_type: config.engine.vm_type,
                timeout_secs: config.engine.timeout_secs,
            })?;
            Adapters {
                engine: Arc::new(engine),
                recipes: Arc::new(GitRecipeSource::new(&config.storage.recipes_dir)),
                models: Arc::new(LocalModelStore::new(&config.storage.models_dir)),
                builder: Arc::new(PodmanImageBuilder::new()),
            }
        }
        EngineKind::Fake => {
            tracing::warn!("Using in-memory fake container engine");
            Adapters {
                engine: Arc::new(FakeContainerEngine::new()),
                recipes: Arc::new(FakeRecipeSource::new()),
                models: Arc::new(FakeModelStore::new()),
                builder: Arc::new(FakeImageBuilder::new()),
            }
        }
    };
    Ok(adapters)
}

fn build_cluster(config: &AppConfig) -> anyhow::Result<Arc<dyn ClusterPort>> {
    if config.engine.kind == EngineKind::Fake {
        return Ok(Arc::new(FakeCluster::new()));
    }
    let client = KubeClient::new(KubeClientConfig {
        api_url: config.cluster.api_url.clone(),
        namespace: config.cluster.namespace.clone(),
        token: config.cluster.token.clone(),
        context_name: config.cluster.context_name.clone(),
        ..KubeClientConfig::default()
    })?;
    Ok(Arc::new(client))
}

fn init_tracing(config: &AppConfig) {
    let log_filter = format!(
        "{},ailab={},tower_http=debug",
        config.log.level, config.log.level
    );
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_filter));

    if config.log.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置（优先级：环境变量 > 配置文件 > 默认值）
    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    init_tracing(&config);

    tracing::info!("AI Lab workload orchestrator");
    print_config(&config);

    tokio::fs::create_dir_all(&config.storage.models_dir).await?;
    tokio::fs::create_dir_all(&config.storage.recipes_dir).await?;

    let adapters = build_adapters(&config)?;

    // 事件与任务
    let event_publisher = Arc::new(EventPublisher::new());
    let task_manager = Arc::new(InMemoryTaskManager::new(event_publisher.clone()));
    let tasks: Arc<dyn TaskManagerPort> = task_manager.clone();

    let bus = ContainerEventBus::new().arc();
    bus.init(adapters.engine.clone()).await?;

    let pods = PodManager::new(adapters.engine.clone()).arc();
    pods.init(&bus);

    // 应用编排
    let applications = ApplicationManager::new(
        adapters.engine.clone(),
        pods.clone(),
        tasks.clone(),
        Arc::new(ApplicationRegistry::new()),
        event_publisher.clone(),
        ApplicationCollaborators {
            recipes: adapters.recipes.clone(),
            models: adapters.models.clone(),
            builder: adapters.builder.clone(),
        },
        ApplicationManagerConfig {
            health_check_interval: Duration::from_secs(
                config.applications.health_check_interval_secs,
            ),
            container_start_poll: Duration::from_secs(config.applications.container_start_poll_secs),
            container_start_timeout: Duration::from_secs(
                config.applications.container_start_timeout_secs,
            ),
        },
    )
    .arc();
    applications.init().await;

    // 推理编排
    let inference = match config.inference.backend {
        InferenceBackendKind::Engine => {
            let providers = Arc::new(ProviderRegistry::with_defaults(
                adapters.engine.clone(),
                tasks.clone(),
            ));
            let manager = EngineInferenceManager::new(
                adapters.engine.clone(),
                bus.clone(),
                tasks.clone(),
                event_publisher.clone(),
                providers,
                adapters.models.clone(),
                EngineInferenceConfig {
                    status_poll: config.inference.status_poll(),
                    refresh_retries: config.inference.refresh_retries,
                    ..EngineInferenceConfig::default()
                },
            )
            .arc();
            manager.init().await;
            InferenceOrchestrator::Engine(manager)
        }
        InferenceBackendKind::Cluster => {
            let manager = ClusterInferenceManager::new(
                build_cluster(&config)?,
                tasks.clone(),
                event_publisher.clone(),
                ClusterInferenceConfig::default(),
            )
            .arc();
            manager.init().await?;
            InferenceOrchestrator::Cluster(manager)
        }
    };
    tracing::info!(backend = inference.kind(), "Inference orchestrator ready");

    // 创建 HTTP 服务器
    let server_config = ServerConfig::new(&config.server.host, config.server.port);
    let state = AppState::new(
        tasks.clone(),
        event_publisher.clone(),
        applications.clone(),
        inference.clone(),
    );
    let server = HttpServer::new(server_config, state);

    // 启动服务器（带优雅关闭）
    let result = server
        .run_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
                return;
            }
            tracing::info!("Received shutdown signal");
        })
        .await;

    inference.dispose();
    applications.dispose();
    pods.dispose();
    bus.dispose();

    result?;
    tracing::info!("Server shutdown complete");

    Ok(())
}
