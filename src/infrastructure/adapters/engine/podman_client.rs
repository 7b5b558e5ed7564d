//! Podman Client - 通过 libpod REST API 访问 Podman
//!
//! 只支持 TCP 端点（`podman system service tcp:...`）。
//! 事件流为 NDJSON，每行一个事件，连接保持到服务端关闭

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::application::ports::{
    ContainerCreateOptions, ContainerEnginePort, ContainerInfo, ContainerInspect, ContainerState,
    EngineConnection, EngineError, EngineEvent, PodContainerInfo, PodCreateOptions, PodInfo,
    PortMapping, VmType,
};
use crate::domain::Labels;

const API_PREFIX: &str = "/v4.0.0/libpod";

/// Podman 客户端配置
#[derive(Debug, Clone)]
pub struct PodmanClientConfig {
    /// 如 `http://127.0.0.1:8888`
    pub base_url: String,
    pub connection_name: String,
    pub vm_type: VmType,
    pub timeout_secs: u64,
}

impl Default for PodmanClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8888".to_string(),
            connection_name: "podman".to_string(),
            vm_type: VmType::Native,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListContainer {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    image: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    labels: Option<Labels>,
    #[serde(default)]
    ports: Option<Vec<ListPort>>,
    #[serde(default)]
    pod: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListPort {
    #[serde(default)]
    host_port: u16,
    #[serde(default)]
    container_port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectContainer {
    id: String,
    state: InspectState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    status: String,
    #[serde(default)]
    running: bool,
    #[serde(default, alias = "Healthcheck")]
    health: Option<InspectHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHealth {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListPod {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    labels: Option<Labels>,
    #[serde(default)]
    containers: Vec<ListPodContainer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListPodContainer {
    id: String,
    #[serde(default)]
    names: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdResponse {
    id: String,
}

/// libpod 与 docker 兼容格式的事件字段名不同，两种都接受
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "Type", alias = "type", default)]
    kind: String,
    #[serde(rename = "Status", alias = "status", default)]
    status: String,
    #[serde(rename = "Action", default)]
    action: Option<String>,
    #[serde(rename = "ID", alias = "id", default)]
    id: String,
    #[serde(rename = "Actor", default)]
    actor: Option<RawActor>,
}

#[derive(Debug, Deserialize)]
struct RawActor {
    #[serde(rename = "ID", default)]
    id: String,
}

#[derive(Debug, Serialize)]
struct SpecPortMapping {
    container_port: u16,
    host_port: u16,
}

impl From<&PortMapping> for SpecPortMapping {
    fn from(mapping: &PortMapping) -> Self {
        Self {
            container_port: mapping.container_port,
            host_port: mapping.host_port,
        }
    }
}

/// libpod 原生事件与 Docker 兼容事件的状态名不一致，统一成 Docker 的写法
fn normalize_status(status: String) -> String {
    match status.as_str() {
        "died" => "die".to_string(),
        _ => status,
    }
}

/// 解析一行事件，空行或无法解析时返回 None
pub(crate) fn parse_event_line(line: &str) -> Option<EngineEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<RawEvent>(line) {
        Ok(raw) => {
            let id = if raw.id.is_empty() {
                raw.actor.map(|a| a.id).unwrap_or_default()
            } else {
                raw.id
            };
            let status = if raw.status.is_empty() {
                raw.action.unwrap_or_default()
            } else {
                raw.status
            };
            Some(EngineEvent {
                kind: raw.kind.to_lowercase(),
                status: normalize_status(status),
                id,
            })
        }
        Err(e) => {
            tracing::warn!(error = %e, "Malformed engine event");
            None
        }
    }
}

/// libpod SpecGenerator 请求体
fn container_spec(options: &ContainerCreateOptions) -> serde_json::Value {
    let env: HashMap<&str, &str> = options
        .env
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let mounts: Vec<serde_json::Value> = options
        .mounts
        .iter()
        .map(|m| {
            let mut opts = Vec::new();
            if m.read_only {
                opts.push("ro".to_string());
            }
            if let Some(mode) = &m.mode {
                opts.push(mode.clone());
            }
            json!({
                "Destination": m.destination,
                "Source": m.source.to_string_lossy(),
                "Type": "bind",
                "Options": opts,
            })
        })
        .collect();
    let port_mappings: Vec<SpecPortMapping> =
        options.port_mappings.iter().map(SpecPortMapping::from).collect();

    let mut spec = json!({
        "name": options.name,
        "image": options.image,
        "env": env,
        "labels": options.labels,
        "mounts": mounts,
        "portmappings": port_mappings,
    });
    if let Some(pod) = &options.pod {
        spec["pod"] = json!(pod);
    }
    if !options.command.is_empty() {
        spec["command"] = json!(options.command);
    }
    if let Some(check) = &options.health_check {
        spec["healthconfig"] = json!({
            "Test": check.test,
            "Interval": check.interval.as_nanos() as u64,
            "Retries": check.retries,
            "Timeout": check.timeout.as_nanos() as u64,
        });
    }
    spec
}

/// Podman libpod 客户端
pub struct PodmanClient {
    client: Client,
    /// 事件长连接不设超时
    stream_client: Client,
    config: PodmanClientConfig,
}

impl PodmanClient {
    pub fn new(config: PodmanClientConfig) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Connection(e.to_string()))?;
        let stream_client = Client::builder()
            .build()
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        tracing::info!(url = %config.base_url, "PodmanClient initialized");
        Ok(Self {
            client,
            stream_client,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}{}{}",
            self.config.base_url.trim_end_matches('/'),
            API_PREFIX,
            path
        )
    }

    fn map_send_error(e: reqwest::Error) -> EngineError {
        if e.is_connect() || e.is_timeout() {
            EngineError::Connection(e.to_string())
        } else {
            EngineError::InvalidResponse(e.to_string())
        }
    }

    /// 2xx 与 304（已处于目标状态）视为成功
    async fn check(response: Response, resource: &str) -> Result<Response, EngineError> {
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(EngineError::NotFound(resource.to_string()));
        }
        Err(EngineError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn post_empty(&self, path: &str, resource: &str) -> Result<(), EngineError> {
        let response = self
            .client
            .post(self.url(path))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check(response, resource).await?;
        Ok(())
    }

    async fn delete(&self, path: &str, resource: &str) -> Result<(), EngineError> {
        let response = self
            .client
            .delete(self.url(path))
            .query(&[("force", "true")])
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check(response, resource).await?;
        Ok(())
    }
}

#[async_trait]
impl ContainerEnginePort for PodmanClient {
    fn connection(&self) -> EngineConnection {
        EngineConnection {
            id: self.config.connection_name.clone(),
            name: self.config.connection_name.clone(),
            vm_type: self.config.vm_type,
        }
    }

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, EngineError> {
        let response = self
            .client
            .get(self.url("/containers/json"))
            .query(&[("all", "true")])
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let containers: Vec<ListContainer> = Self::check(response, "containers")
            .await?
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerInfo {
                id: c.id,
                engine_id: self.config.connection_name.clone(),
                names: c.names,
                image: c.image,
                state: c.state,
                labels: c.labels.unwrap_or_default(),
                ports: c
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .map(|p| PortMapping {
                        container_port: p.container_port,
                        host_port: p.host_port,
                    })
                    .collect(),
                pod_id: c.pod.filter(|p| !p.is_empty()),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, EngineError> {
        let response = self
            .client
            .get(self.url(&format!("/containers/{}/json", id)))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let inspect: InspectContainer = Self::check(response, id)
            .await?
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))?;

        Ok(ContainerInspect {
            id: inspect.id,
            state: ContainerState {
                status: inspect.state.status,
                running: inspect.state.running,
                health: inspect
                    .state
                    .health
                    .map(|h| h.status)
                    .filter(|s| !s.is_empty()),
            },
        })
    }

    async fn create_container(
        &self,
        options: ContainerCreateOptions,
    ) -> Result<String, EngineError> {
        tracing::debug!(name = %options.name, image = %options.image, "Creating container");
        let response = self
            .client
            .post(self.url("/containers/create"))
            .json(&container_spec(&options))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let created: IdResponse = Self::check(response, &options.image)
            .await?
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))?;
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.post_empty(&format!("/containers/{}/start", id), id).await
    }

    async fn stop_container(&self, id: &str) -> Result<(), EngineError> {
        self.post_empty(&format!("/containers/{}/stop", id), id).await
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        self.delete(&format!("/containers/{}", id), id).await
    }

    /// 拉取进度以 JSON 流返回，出错时流中带 `error` 字段
    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        tracing::info!(image = %image, "Pulling image");
        let response = self
            .stream_client
            .post(self.url("/images/pull"))
            .query(&[("reference", image)])
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let body = Self::check(response, image)
            .await?
            .text()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))?;

        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
                if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
                    if !error.is_empty() {
                        return Err(EngineError::Api {
                            status: 500,
                            message: error.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    async fn list_pods(&self) -> Result<Vec<PodInfo>, EngineError> {
        let response = self
            .client
            .get(self.url("/pods/json"))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let pods: Vec<ListPod> = Self::check(response, "pods")
            .await?
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))?;

        Ok(pods
            .into_iter()
            .map(|p| PodInfo {
                id: p.id,
                engine_id: self.config.connection_name.clone(),
                name: p.name,
                status: p.status,
                labels: p.labels,
                containers: p
                    .containers
                    .into_iter()
                    .map(|c| PodContainerInfo {
                        id: c.id,
                        name: c.names,
                        status: c.status,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn create_pod(&self, options: PodCreateOptions) -> Result<String, EngineError> {
        let port_mappings: Vec<SpecPortMapping> =
            options.port_mappings.iter().map(SpecPortMapping::from).collect();
        let response = self
            .client
            .post(self.url("/pods/create"))
            .json(&json!({
                "name": options.name,
                "labels": options.labels,
                "portmappings": port_mappings,
            }))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let created: IdResponse = Self::check(response, &options.name)
            .await?
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))?;
        Ok(created.id)
    }

    async fn start_pod(&self, id: &str) -> Result<(), EngineError> {
        self.post_empty(&format!("/pods/{}/start", id), id).await
    }

    async fn stop_pod(&self, id: &str) -> Result<(), EngineError> {
        self.post_empty(&format!("/pods/{}/stop", id), id).await
    }

    async fn remove_pod(&self, id: &str) -> Result<(), EngineError> {
        self.delete(&format!("/pods/{}", id), id).await
    }

    async fn events(&self) -> Result<mpsc::Receiver<EngineEvent>, EngineError> {
        let response = self
            .stream_client
            .get(self.url("/events"))
            .query(&[("stream", "true")])
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let response = Self::check(response, "events").await?;

        let (sender, receiver) = mpsc::channel(1024);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::warn!(error = %e, "Engine event stream failed");
                        break;
                    }
                };
                buffer.extend_from_slice(&chunk);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    if let Some(event) = parse_event_line(&String::from_utf8_lossy(&line)) {
                        if sender.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
            tracing::info!("Engine event stream closed");
        });
        Ok(receiver)
    }
}
