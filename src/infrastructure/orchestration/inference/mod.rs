//! Inference Orchestrators
//!
//! 两个后端实现同一契约：容器引擎后端以轮询 + 事件对账，Kubernetes 后端以 informer 对账

mod backend;
mod cluster_manager;
mod engine_manager;
mod provider;
mod proxy;

pub use backend::InferenceOrchestrator;
pub use cluster_manager::{ClusterInferenceConfig, ClusterInferenceManager};
pub use engine_manager::{EngineInferenceConfig, EngineInferenceManager};
pub use provider::{
    ContainerProvider, InferenceProvider, ProviderRegistry, ProviderRequest,
    INFERENCE_CONTAINER_PORT, LLAMA_CPP_IMAGE, WHISPER_CPP_IMAGE,
};
pub use proxy::PortForwardProxy;
