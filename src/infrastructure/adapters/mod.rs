//! Infrastructure Adapters
//!
//! 六边形架构的适配器实现：真实的 Podman / Kubernetes / 协作者客户端，以及测试用的内存实现

pub mod cluster;
pub mod collaborators;
pub mod engine;

pub use cluster::{FakeCluster, KubeClient, KubeClientConfig};
pub use collaborators::{
    FakeImageBuilder, FakeModelStore, FakeRecipeSource, GitRecipeSource, LocalModelStore,
    PodmanImageBuilder,
};
pub use engine::{FakeContainerEngine, PodmanClient, PodmanClientConfig};
