//! AI Lab - 本地 AI 工作负载编排
//!
//! 架构设计: Hexagonal Architecture
//!
//! 领域层 (domain/):
//! - 标签约定、健康归约、推理服务状态机、recipe 与应用状态
//!
//! 应用层 (application/):
//! - Ports: 端口定义（ContainerEngine, Cluster, TaskManager, 外部协作者）
//! - Runtime: 编排器共享契约与 trackingId 请求包装
//!
//! 基础设施层 (infrastructure/):
//! - Memory: TaskManager, ApplicationRegistry 内存实现
//! - Events: 容器事件总线与 UI 事件发布
//! - Pods: Pod 查询与健康归约
//! - Orchestration: 应用编排器与推理编排器（容器引擎 / Kubernetes）
//! - Adapters: Podman, Kubernetes, git, 模型下载, 镜像构建, 以及内存实现
//! - HTTP: RESTful API + WebSocket

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::{load_config, AppConfig};
