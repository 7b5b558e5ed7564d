//! Configuration Types
//!
//! 定义所有配置结构体

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::application::ports::VmType;

/// 应用主配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,

    /// 容器引擎配置
    #[serde(default)]
    pub engine: EngineConfig,

    /// Kubernetes 配置
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// 推理服务配置
    #[serde(default)]
    pub inference: InferenceConfig,

    /// 应用编排配置
    #[serde(default)]
    pub applications: ApplicationsConfig,

    /// 存储配置
    #[serde(default)]
    pub storage: StorageConfig,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,

    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5070
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// 获取服务器地址
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 容器引擎实现
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Podman libpod REST API
    #[default]
    Podman,
    /// 内存实现，不依赖真实引擎
    Fake,
}

/// 容器引擎配置
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub kind: EngineKind,

    /// libpod API 地址（`podman system service tcp:...`）
    #[serde(default = "default_engine_url")]
    pub url: String,

    #[serde(default = "default_connection_name")]
    pub connection_name: String,

    /// 虚拟机类型；qemu 下绑定挂载不带 SELinux 标签
    #[serde(default)]
    pub vm_type: VmType,

    /// 请求超时时间（秒）
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,
}

fn default_engine_url() -> String {
    "http://127.0.0.1:8888".to_string()
}

fn default_connection_name() -> String {
    "podman".to_string()
}

fn default_engine_timeout() -> u64 {
    60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::default(),
            url: default_engine_url(),
            connection_name: default_connection_name(),
            vm_type: VmType::default(),
            timeout_secs: default_engine_timeout(),
        }
    }
}

/// Kubernetes 配置
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Bearer token
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_context_name")]
    pub context_name: String,
}

fn default_api_url() -> String {
    "https://127.0.0.1:6443".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_context_name() -> String {
    "default".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: default_api_url(),
            namespace: default_namespace(),
            token: None,
            context_name: default_context_name(),
        }
    }
}

/// 推理后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceBackendKind {
    #[default]
    Engine,
    Cluster,
}

impl InferenceBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceBackendKind::Engine => "engine",
            InferenceBackendKind::Cluster => "cluster",
        }
    }
}

/// 推理服务配置
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default)]
    pub backend: InferenceBackendKind,

    /// 对账刷新的重试次数
    #[serde(default = "default_refresh_retries")]
    pub refresh_retries: u32,

    /// 容器状态轮询间隔（秒）
    #[serde(default = "default_status_poll")]
    pub status_poll_secs: u64,
}

fn default_refresh_retries() -> u32 {
    3
}

fn default_status_poll() -> u64 {
    10
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            backend: InferenceBackendKind::default(),
            refresh_retries: default_refresh_retries(),
            status_poll_secs: default_status_poll(),
        }
    }
}

impl InferenceConfig {
    pub fn status_poll(&self) -> Duration {
        Duration::from_secs(self.status_poll_secs)
    }
}

/// 应用编排配置
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationsConfig {
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,

    /// 等待容器运行的轮询间隔（秒）
    #[serde(default = "default_container_start_poll")]
    pub container_start_poll_secs: u64,

    /// 等待容器运行的上限（秒）
    #[serde(default = "default_container_start_timeout")]
    pub container_start_timeout_secs: u64,
}

fn default_health_check_interval() -> u64 {
    10
}

fn default_container_start_poll() -> u64 {
    5
}

fn default_container_start_timeout() -> u64 {
    3600 // 1 小时
}

impl Default for ApplicationsConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_check_interval(),
            container_start_poll_secs: default_container_start_poll(),
            container_start_timeout_secs: default_container_start_timeout(),
        }
    }
}

/// 存储配置
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// 模型文件目录
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    /// recipe 仓库检出目录
    #[serde(default = "default_recipes_dir")]
    pub recipes_dir: PathBuf,
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("data/models")
}

fn default_recipes_dir() -> PathBuf {
    PathBuf::from("data/recipes")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            recipes_dir: default_recipes_dir(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否启用 JSON 格式
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
