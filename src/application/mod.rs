//! 应用层 - 编排契约
//!
//! 包含：
//! - ports: 六边形架构端口定义（ContainerEngine、Cluster、TaskManager、外部协作者）
//! - runtime: 编排器共享契约与 trackingId 请求包装
//! - error: 编排层错误定义

pub mod error;
pub mod ports;
pub mod runtime;

pub use error::OrchestratorError;
pub use runtime::{request_with_tracking, run_tracked, WorkloadRuntime};

pub use ports::{
    // Cluster
    ClusterContext,
    ClusterError,
    ClusterPod,
    ClusterPort,
    PodWatchEvent,
    // Collaborators
    CollaboratorError,
    ImageBuilderPort,
    ModelStorePort,
    RecipeSourcePort,
    // Container engine
    ContainerEnginePort,
    EngineConnection,
    EngineError,
    EngineEvent,
    PodInfo,
    // Task manager
    Task,
    TaskManagerPort,
    TaskState,
};
