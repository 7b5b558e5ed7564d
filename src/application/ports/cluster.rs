//! Cluster Port - Kubernetes 集群抽象
//!
//! 只用到 core v1 的 Pod 与 PersistentVolumeClaim、基于标签选择器的 watch，以及 port-forward 流。
//! 资源结构与 Kubernetes JSON 字段保持一致，adapter 可以直接反序列化 API 响应

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use crate::domain::Labels;

/// 集群错误
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Cannot connect to cluster: {0}")]
    Connection(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cluster API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Port forward failed: {0}")]
    PortForward(String),
}

/// 当前 context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterContext {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Labels>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Labels>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub container_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PvcVolumeSource {
    pub claim_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PvcVolumeSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub name: String,
    #[serde(default)]
    pub ready: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_statuses: Vec<ContainerStatus>,
}

/// core v1 Pod（只保留用到的字段）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPod {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<PodSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PodStatus>,
}

impl ClusterPod {
    pub fn uid(&self) -> Option<&str> {
        self.metadata.uid.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref()
    }

    pub fn annotation(&self, key: &str) -> Option<&String> {
        self.metadata.annotations.as_ref().and_then(|a| a.get(key))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default)]
    pub requests: Labels,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PvcSpec {
    pub access_modes: Vec<String>,
    pub resources: ResourceRequirements,
}

/// core v1 PersistentVolumeClaim
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaim {
    pub metadata: ObjectMeta,
    pub spec: PvcSpec,
}

/// Informer 推送的事件
#[derive(Debug, Clone, PartialEq)]
pub enum PodWatchEvent {
    Added(ClusterPod),
    Modified(ClusterPod),
    Deleted(ClusterPod),
    Error(String),
}

/// Cluster Port
#[async_trait]
pub trait ClusterPort: Send + Sync {
    fn context(&self) -> ClusterContext;

    async fn list_pods(&self, selector: &str) -> Result<Vec<ClusterPod>, ClusterError>;

    async fn create_pod(&self, pod: ClusterPod) -> Result<ClusterPod, ClusterError>;

    async fn delete_pod(&self, name: &str) -> Result<(), ClusterError>;

    async fn create_pvc(&self, pvc: PersistentVolumeClaim) -> Result<(), ClusterError>;

    /// 长连接 watch，接收端关闭后停止
    async fn watch_pods(&self, selector: &str)
        -> Result<mpsc::Receiver<PodWatchEvent>, ClusterError>;

    /// 打开到 Pod 端口的转发流
    async fn port_forward(&self, pod_name: &str, port: u16) -> Result<DuplexStream, ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_pod() {
        let json = r#"{
            "metadata": {
                "name": "llama-abc",
                "uid": "1234",
                "labels": {"app.kubernetes.io/managed-by": "ai-lab"},
                "annotations": {"ai-lab/port": "35000"},
                "deletionTimestamp": "2024-01-01T00:00:00Z"
            },
            "spec": {"containers": [{"name": "server", "image": "img", "ports": [{"containerPort": 8000}]}]},
            "status": {"phase": "Running", "containerStatuses": [{"name": "server", "ready": true}]}
        }"#;
        let pod: ClusterPod = serde_json::from_str(json).unwrap();
        assert_eq!(pod.uid(), Some("1234"));
        assert_eq!(pod.annotation("ai-lab/port").map(String::as_str), Some("35000"));
        assert!(pod.metadata.deletion_timestamp.is_some());
        let spec = pod.spec.unwrap();
        assert_eq!(spec.containers[0].ports[0].container_port, 8000);
        assert_eq!(pod.status.unwrap().phase.as_deref(), Some("Running"));
    }
}
