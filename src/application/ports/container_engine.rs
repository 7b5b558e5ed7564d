//! Container Engine Port - 容器引擎抽象
//!
//! 容器与 Pod 的增删改查、镜像拉取以及原始事件流，具体实现在 infrastructure/adapters 层

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::Labels;

/// 引擎事件类型：容器
pub const EVENT_TYPE_CONTAINER: &str = "container";
/// 引擎事件类型：Pod
pub const EVENT_TYPE_POD: &str = "pod";

/// 容器引擎错误
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Cannot connect to container engine: {0}")]
    Connection(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Engine API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// 引擎所在虚拟机类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VmType {
    /// 宿主机直接运行
    #[default]
    Native,
    Wsl,
    HyperV,
    AppleHv,
    LibKrun,
    Qemu,
}

/// 引擎连接
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineConnection {
    pub id: String,
    pub name: String,
    pub vm_type: VmType,
}

impl EngineConnection {
    /// 绑定挂载的 SELinux 标签模式；QEMU 虚拟化下不设置
    pub fn bind_mode(&self) -> Option<&'static str> {
        match self.vm_type {
            VmType::Qemu => None,
            _ => Some("Z"),
        }
    }
}

/// 原始引擎事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvent {
    /// container / pod / image ...
    pub kind: String,
    /// start / die / remove ...
    pub status: String,
    pub id: String,
}

/// 端口映射
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
}

/// 容器列表项
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    pub id: String,
    pub engine_id: String,
    pub names: Vec<String>,
    pub image: String,
    /// running / exited / created ...
    pub state: String,
    pub labels: Labels,
    pub ports: Vec<PortMapping>,
    pub pod_id: Option<String>,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// 容器运行状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub status: String,
    pub running: bool,
    /// 健康检查状态，未配置时为 None
    pub health: Option<String>,
}

/// 容器详情
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInspect {
    pub id: String,
    pub state: ContainerState,
}

/// 绑定挂载
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub source: PathBuf,
    pub destination: String,
    pub read_only: bool,
    /// SELinux 标签模式（如 `Z`）
    pub mode: Option<String>,
}

/// 健康检查
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub test: Vec<String>,
    pub interval: Duration,
    pub retries: u32,
    pub timeout: Duration,
}

impl HealthCheck {
    /// 对容器端口发起 HTTP 请求的健康检查（5s 间隔，20 次重试，2s 超时）
    pub fn http(port: u16) -> Self {
        Self {
            test: vec![
                "CMD-SHELL".to_string(),
                format!("curl -s localhost:{} > /dev/null", port),
            ],
            interval: Duration::from_secs(5),
            retries: 20,
            timeout: Duration::from_secs(2),
        }
    }
}

/// 创建容器参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerCreateOptions {
    pub name: String,
    pub image: String,
    /// 加入的 Pod
    pub pod: Option<String>,
    pub env: Vec<(String, String)>,
    pub labels: Labels,
    pub mounts: Vec<MountSpec>,
    pub port_mappings: Vec<PortMapping>,
    pub health_check: Option<HealthCheck>,
    pub command: Vec<String>,
}

/// Pod 中的容器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodContainerInfo {
    pub id: String,
    pub name: String,
    pub status: String,
}

/// Pod 列表项
#[derive(Debug, Clone, PartialEq)]
pub struct PodInfo {
    pub id: String,
    pub engine_id: String,
    pub name: String,
    /// Running / Exited / Created ...
    pub status: String,
    /// 引擎可能不返回标签字段
    pub labels: Option<Labels>,
    pub containers: Vec<PodContainerInfo>,
}

/// 创建 Pod 参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodCreateOptions {
    pub name: String,
    pub labels: Labels,
    pub port_mappings: Vec<PortMapping>,
}

/// Container Engine Port
///
/// 同一时刻只连接一个引擎
#[async_trait]
pub trait ContainerEnginePort: Send + Sync {
    /// 当前引擎连接
    fn connection(&self) -> EngineConnection;

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, EngineError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, EngineError>;

    /// 创建容器，返回容器 ID
    async fn create_container(&self, options: ContainerCreateOptions)
        -> Result<String, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    async fn stop_container(&self, id: &str) -> Result<(), EngineError>;

    async fn remove_container(&self, id: &str) -> Result<(), EngineError>;

    async fn pull_image(&self, image: &str) -> Result<(), EngineError>;

    async fn list_pods(&self) -> Result<Vec<PodInfo>, EngineError>;

    /// 创建 Pod，返回 Pod ID
    async fn create_pod(&self, options: PodCreateOptions) -> Result<String, EngineError>;

    async fn start_pod(&self, id: &str) -> Result<(), EngineError>;

    async fn stop_pod(&self, id: &str) -> Result<(), EngineError>;

    async fn remove_pod(&self, id: &str) -> Result<(), EngineError>;

    /// 订阅全部原始事件
    async fn events(&self) -> Result<mpsc::Receiver<EngineEvent>, EngineError>;
}
