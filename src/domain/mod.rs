//! Domain Layer - 领域层
//!
//! 纯值类型与纯函数：
//! - labels: 跨进程标签约定
//! - health: 容器/Pod 健康归约
//! - model: 模型元数据
//! - inference: 推理服务实体与状态机
//! - application: recipe 与应用状态

pub mod application;
pub mod health;
pub mod inference;
pub mod labels;
pub mod model;

pub use application::{
    AppKey, ApplicationOptions, ApplicationState, BuiltImage, Recipe, RecipeComponent,
};
pub use health::{ContainerHealth, PodHealth};
pub use inference::{
    HealthSnapshot, InferenceServer, InferenceServerConfig, InferenceServerStatus,
    ServerConnection,
};
pub use labels::Labels;
pub use model::{common_backend, model_label, InferenceType, ModelFile, ModelInfo};
