//! Inference Server - 推理服务实体
//!
//! 状态机：starting / stopping / deleting 为过渡状态，过渡期间拒绝任何其他改变状态的操作

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::labels::Labels;
use super::model::{InferenceType, ModelInfo};

/// 推理服务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceServerStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Deleting,
    Error,
}

impl InferenceServerStatus {
    /// 是否处于过渡状态
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            InferenceServerStatus::Starting
                | InferenceServerStatus::Stopping
                | InferenceServerStatus::Deleting
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceServerStatus::Starting => "starting",
            InferenceServerStatus::Running => "running",
            InferenceServerStatus::Stopping => "stopping",
            InferenceServerStatus::Stopped => "stopped",
            InferenceServerStatus::Deleting => "deleting",
            InferenceServerStatus::Error => "error",
        }
    }
}

/// 某一时刻的健康快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: String,
    pub checked_at: DateTime<Utc>,
}

impl HealthSnapshot {
    pub fn now(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            checked_at: Utc::now(),
        }
    }
}

/// 连接信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConnection {
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// 推理服务
///
/// `id` 在引擎后端是容器 ID，在集群后端是 Pod UID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceServer {
    pub id: String,
    /// 引擎连接 ID 或集群 context 名称
    pub engine_id: String,
    pub status: InferenceServerStatus,
    pub health: Option<HealthSnapshot>,
    /// 所服务的 model id
    pub models: Vec<String>,
    pub connection: ServerConnection,
    pub backend: InferenceType,
    #[serde(default)]
    pub labels: Labels,
}

impl InferenceServer {
    /// 显式切换状态，同时重置健康快照
    pub fn set_status(&mut self, status: InferenceServerStatus) {
        self.status = status;
        self.health = None;
    }
}

/// 创建推理服务的参数
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceServerConfig {
    /// 本地端口
    pub port: u16,
    /// 指定 provider 名称；为空时选择第一个可用的匹配 provider
    #[serde(default)]
    pub provider_id: Option<String>,
    /// 覆盖 provider 默认镜像
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub labels: Labels,
    pub models: Vec<ModelInfo>,
}

/// 解析推理服务标签中的 model id 列表（JSON 数组）
pub fn parse_model_ids(value: &str) -> Result<Vec<String>, serde_json::Error> {
    serde_json::from_str(value)
}

/// 编码 model id 列表
pub fn encode_model_ids(models: &[ModelInfo]) -> String {
    let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
    serde_json::to_string(&ids).unwrap_or_else(|_| "[]".to_string())
}
