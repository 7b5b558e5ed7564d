//! 运行时选择的推理后端
//!
//! 生命周期操作经由两个后端共同的 `WorkloadRuntime` 契约分派

use std::sync::Arc;

use super::{ClusterInferenceManager, EngineInferenceManager};
use crate::application::{OrchestratorError, WorkloadRuntime};
use crate::domain::{InferenceServer, InferenceServerConfig};

/// 进程内同一时刻只使用一个推理后端
#[derive(Clone)]
pub enum InferenceOrchestrator {
    Engine(Arc<EngineInferenceManager>),
    Cluster(Arc<ClusterInferenceManager>),
}

impl InferenceOrchestrator {
    pub fn kind(&self) -> &'static str {
        match self {
            InferenceOrchestrator::Engine(_) => "engine",
            InferenceOrchestrator::Cluster(_) => "cluster",
        }
    }

    pub fn get_servers(&self) -> Vec<InferenceServer> {
        match self {
            InferenceOrchestrator::Engine(manager) => WorkloadRuntime::list(manager),
            InferenceOrchestrator::Cluster(manager) => WorkloadRuntime::list(manager),
        }
    }

    /// 后台创建，返回 trackingId
    pub fn request_create(&self, config: InferenceServerConfig) -> String {
        match self {
            InferenceOrchestrator::Engine(manager) => manager.request_create(config),
            InferenceOrchestrator::Cluster(manager) => manager.request_create(config),
        }
    }

    pub async fn start_server(&self, id: &str) -> Result<(), OrchestratorError> {
        match self {
            InferenceOrchestrator::Engine(manager) => WorkloadRuntime::start(manager, id).await,
            InferenceOrchestrator::Cluster(manager) => WorkloadRuntime::start(manager, id).await,
        }
    }

    pub async fn stop_server(&self, id: &str) -> Result<(), OrchestratorError> {
        match self {
            InferenceOrchestrator::Engine(manager) => WorkloadRuntime::stop(manager, id).await,
            InferenceOrchestrator::Cluster(manager) => WorkloadRuntime::stop(manager, id).await,
        }
    }

    pub async fn delete_server(&self, id: &str) -> Result<(), OrchestratorError> {
        match self {
            InferenceOrchestrator::Engine(manager) => WorkloadRuntime::remove(manager, id).await,
            InferenceOrchestrator::Cluster(manager) => WorkloadRuntime::remove(manager, id).await,
        }
    }

    pub fn dispose(&self) {
        match self {
            InferenceOrchestrator::Engine(manager) => manager.dispose(),
            InferenceOrchestrator::Cluster(manager) => manager.dispose(),
        }
    }
}
