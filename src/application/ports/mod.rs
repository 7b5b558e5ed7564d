//! Application Ports - 出站端口定义
//!
//! 定义编排层与基础设施层之间的抽象接口

mod cluster;
mod collaborators;
mod container_engine;
mod task_manager;

pub use cluster::{
    ClusterContext, ClusterError, ClusterPod, ClusterPort, Container, ContainerPort,
    ContainerStatus, EnvVar, ObjectMeta, PersistentVolumeClaim, PodSpec, PodStatus,
    PodWatchEvent, PvcSpec, PvcVolumeSource, ResourceRequirements, Volume, VolumeMount,
};
pub use collaborators::{CollaboratorError, ImageBuilderPort, ModelStorePort, RecipeSourcePort};
pub use container_engine::{
    ContainerCreateOptions, ContainerEnginePort, ContainerInfo, ContainerInspect, ContainerState,
    EngineConnection, EngineError, EngineEvent, HealthCheck, MountSpec, PodContainerInfo,
    PodCreateOptions, PodInfo, PortMapping, VmType, EVENT_TYPE_CONTAINER, EVENT_TYPE_POD,
};
pub use task_manager::{Task, TaskManagerPort, TaskState};
