//! Orchestration - 应用与推理服务编排器

pub mod applications;
pub mod inference;
pub mod net;
pub mod ticker;

pub use applications::{ApplicationCollaborators, ApplicationManager, ApplicationManagerConfig};
pub use inference::{
    ClusterInferenceConfig, ClusterInferenceManager, EngineInferenceConfig, EngineInferenceManager,
    InferenceOrchestrator, ProviderRegistry,
};
pub use ticker::Ticker;
