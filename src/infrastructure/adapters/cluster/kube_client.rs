//! Kube Client - 直接调用 Kubernetes core v1 REST API
//!
//! watch 以 NDJSON 流返回 `{"type": ..., "object": ...}`。
//! 服务端正常结束流时按最后的 resourceVersion 重新 watch；收到 ERROR（如 410 Gone）则推送错误并关闭接收端，由调用方重新 list

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use super::port_forward;
use crate::application::ports::{
    ClusterContext, ClusterError, ClusterPod, ClusterPort, PersistentVolumeClaim, PodWatchEvent,
};

/// 集群客户端配置
#[derive(Debug, Clone)]
pub struct KubeClientConfig {
    pub api_url: String,
    pub namespace: String,
    pub token: Option<String>,
    pub context_name: String,
    pub timeout_secs: u64,
    /// watch 正常结束后重连前的等待
    pub rewatch_delay: Duration,
}

impl Default for KubeClientConfig {
    fn default() -> Self {
        Self {
            api_url: "https://127.0.0.1:6443".to_string(),
            namespace: "default".to_string(),
            token: None,
            context_name: "default".to_string(),
            timeout_secs: 30,
            rewatch_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<ClusterPod>,
}

#[derive(Debug, Deserialize)]
struct WatchLine {
    #[serde(rename = "type")]
    kind: String,
    object: serde_json::Value,
}

/// 解析一行 watch 输出；无法识别时返回 None
fn parse_watch_line(line: &str) -> Option<PodWatchEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let parsed: WatchLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed watch event");
            return None;
        }
    };
    if parsed.kind == "ERROR" {
        let message = parsed
            .object
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("watch error")
            .to_string();
        return Some(PodWatchEvent::Error(message));
    }
    let pod: ClusterPod = match serde_json::from_value(parsed.object) {
        Ok(pod) => pod,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed pod in watch event");
            return None;
        }
    };
    match parsed.kind.as_str() {
        "ADDED" => Some(PodWatchEvent::Added(pod)),
        "MODIFIED" => Some(PodWatchEvent::Modified(pod)),
        "DELETED" => Some(PodWatchEvent::Deleted(pod)),
        other => {
            tracing::debug!(kind = %other, "Ignoring watch event");
            None
        }
    }
}

#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    stream_client: Client,
    config: KubeClientConfig,
}

impl KubeClient {
    pub fn new(config: KubeClientConfig) -> Result<Self, ClusterError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClusterError::Connection(e.to_string()))?;
        let stream_client = Client::builder()
            .build()
            .map_err(|e| ClusterError::Connection(e.to_string()))?;

        tracing::info!(url = %config.api_url, namespace = %config.namespace, "KubeClient initialized");
        Ok(Self {
            client,
            stream_client,
            config,
        })
    }

    fn namespaced(&self, resource: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.namespace,
            resource
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn map_send_error(e: reqwest::Error) -> ClusterError {
        if e.is_connect() || e.is_timeout() {
            ClusterError::Connection(e.to_string())
        } else {
            ClusterError::InvalidResponse(e.to_string())
        }
    }

    async fn check(response: Response, resource: &str) -> Result<Response, ClusterError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(ClusterError::NotFound(resource.to_string()));
        }
        Err(ClusterError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn open_watch(request: RequestBuilder) -> Result<Response, ClusterError> {
        let response = request.send().await.map_err(Self::map_send_error)?;
        Self::check(response, "pods").await
    }

    fn watch_request(&self, selector: &str, resource_version: Option<&str>) -> RequestBuilder {
        let mut query = vec![
            ("watch", "true".to_string()),
            ("labelSelector", selector.to_string()),
            ("allowWatchBookmarks", "false".to_string()),
        ];
        if let Some(version) = resource_version {
            query.push(("resourceVersion", version.to_string()));
        }
        self.authorized(self.stream_client.get(self.namespaced("pods")).query(&query))
    }
}

/// 读取一次 watch 流并记录最后的 resourceVersion；接收端关闭或收到 ERROR 时返回 false
async fn pump_watch(
    response: Response,
    sender: &mpsc::Sender<PodWatchEvent>,
    resource_version: &mut Option<String>,
) -> bool {
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "Watch stream interrupted");
                return true;
            }
        };
        buffer.extend_from_slice(&chunk);
        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            let Some(event) = parse_watch_line(&String::from_utf8_lossy(&line)) else {
                continue;
            };
            let is_error = matches!(event, PodWatchEvent::Error(_));
            if let PodWatchEvent::Added(pod) | PodWatchEvent::Modified(pod) | PodWatchEvent::Deleted(pod) = &event {
                if let Some(version) = &pod.metadata.resource_version {
                    *resource_version = Some(version.clone());
                }
            }
            if sender.send(event).await.is_err() || is_error {
                return false;
            }
        }
    }
    true
}

#[async_trait]
impl ClusterPort for KubeClient {
    fn context(&self) -> ClusterContext {
        ClusterContext {
            name: self.config.context_name.clone(),
            namespace: self.config.namespace.clone(),
        }
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<ClusterPod>, ClusterError> {
        let response = self
            .authorized(
                self.client
                    .get(self.namespaced("pods"))
                    .query(&[("labelSelector", selector)]),
            )
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let list: PodList = Self::check(response, "pods")
            .await?
            .json()
            .await
            .map_err(|e| ClusterError::InvalidResponse(e.to_string()))?;
        Ok(list.items)
    }

    async fn create_pod(&self, pod: ClusterPod) -> Result<ClusterPod, ClusterError> {
        let response = self
            .authorized(self.client.post(self.namespaced("pods")).json(&pod))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check(response, "pods")
            .await?
            .json()
            .await
            .map_err(|e| ClusterError::InvalidResponse(e.to_string()))
    }

    async fn delete_pod(&self, name: &str) -> Result<(), ClusterError> {
        let response = self
            .authorized(self.client.delete(self.namespaced(&format!("pods/{}", name))))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check(response, name).await?;
        Ok(())
    }

    async fn create_pvc(&self, pvc: PersistentVolumeClaim) -> Result<(), ClusterError> {
        let response = self
            .authorized(
                self.client
                    .post(self.namespaced("persistentvolumeclaims"))
                    .json(&pvc),
            )
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check(response, "persistentvolumeclaims").await?;
        Ok(())
    }

    async fn watch_pods(
        &self,
        selector: &str,
    ) -> Result<mpsc::Receiver<PodWatchEvent>, ClusterError> {
        let first = Self::open_watch(self.watch_request(selector, None)).await?;

        let (sender, receiver) = mpsc::channel(256);
        let client = self.clone();
        let selector = selector.to_string();
        tokio::spawn(async move {
            let mut resource_version: Option<String> = None;
            let mut response = first;
            loop {
                if !pump_watch(response, &sender, &mut resource_version).await || sender.is_closed() {
                    break;
                }
                tokio::time::sleep(client.config.rewatch_delay).await;
                let request = client.watch_request(&selector, resource_version.as_deref());
                response = match KubeClient::open_watch(request).await {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::warn!(error = %e, "Cannot re-establish pod watch");
                        break;
                    }
                };
                tracing::debug!(resource_version = ?resource_version, "Pod watch re-established");
            }
        });
        Ok(receiver)
    }

    async fn port_forward(&self, pod_name: &str, port: u16) -> Result<DuplexStream, ClusterError> {
        let url = port_forward::port_forward_url(
            &self.config.api_url,
            &self.config.namespace,
            pod_name,
            port,
        );
        port_forward::open(&url, self.config.token.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::routing::{delete, get};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(api_url: String) -> KubeClient {
        KubeClient::new(KubeClientConfig {
            api_url,
            namespace: "ai".to_string(),
            rewatch_delay: Duration::from_millis(1),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parse_watch_lines() {
        let added = r#"{"type":"ADDED","object":{"metadata":{"name":"p","uid":"u","resourceVersion":"7"}}}"#;
        match parse_watch_line(added) {
            Some(PodWatchEvent::Added(pod)) => assert_eq!(pod.uid(), Some("u")),
            other => panic!("unexpected {:?}", other),
        }
        let error = r#"{"type":"ERROR","object":{"kind":"Status","message":"too old resource version","code":410}}"#;
        assert_eq!(
            parse_watch_line(error),
            Some(PodWatchEvent::Error("too old resource version".to_string()))
        );
        assert!(parse_watch_line(r#"{"type":"BOOKMARK","object":{"metadata":{}}}"#).is_none());
        assert!(parse_watch_line("garbage").is_none());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let router = Router::new()
            .route(
                "/api/v1/namespaces/ai/pods",
                get(|Query(query): Query<HashMap<String, String>>| async move {
                    assert_eq!(query.get("labelSelector").unwrap(), "app.kubernetes.io/managed-by=ai-lab");
                    Json(json!({"items": [{"metadata": {"name": "p", "uid": "u"}, "status": {"phase": "Running"}}]}))
                }),
            )
            .route(
                "/api/v1/namespaces/ai/pods/:name",
                delete(|| async { (StatusCode::NOT_FOUND, "{}") }),
            );
        let client = client(serve(router).await);

        let pods = client
            .list_pods("app.kubernetes.io/managed-by=ai-lab")
            .await
            .unwrap();
        assert_eq!(pods[0].name(), Some("p"));
        assert!(matches!(
            client.delete_pod("gone").await,
            Err(ClusterError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_watch_stops_after_error_event() {
        let router = Router::new().route(
            "/api/v1/namespaces/ai/pods",
            get(|| async {
                concat!(
                    r#"{"type":"ADDED","object":{"metadata":{"name":"p","uid":"u","resourceVersion":"1"}}}"#,
                    "\n",
                    r#"{"type":"ERROR","object":{"message":"gone"}}"#,
                    "\n"
                )
            }),
        );
        let client = client(serve(router).await);
        let mut events = client.watch_pods("a=b").await.unwrap();

        assert!(matches!(events.recv().await, Some(PodWatchEvent::Added(_))));
        assert_eq!(events.recv().await, Some(PodWatchEvent::Error("gone".to_string())));
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_watch_resumes_from_resource_version() {
        let router = Router::new().route(
            "/api/v1/namespaces/ai/pods",
            get(|Query(query): Query<HashMap<String, String>>| async move {
                match query.get("resourceVersion").map(String::as_str) {
                    None => r#"{"type":"ADDED","object":{"metadata":{"name":"p","uid":"u","resourceVersion":"5"}}}
"#
                    .to_string(),
                    Some("5") => r#"{"type":"DELETED","object":{"metadata":{"name":"p","uid":"u","resourceVersion":"6"}}}
{"type":"ERROR","object":{"message":"done"}}
"#
                    .to_string(),
                    Some(_) => String::new(),
                }
            }),
        );
        let client = client(serve(router).await);
        let mut events = client.watch_pods("a=b").await.unwrap();

        assert!(matches!(events.recv().await, Some(PodWatchEvent::Added(_))));
        assert!(matches!(events.recv().await, Some(PodWatchEvent::Deleted(_))));
        assert!(matches!(events.recv().await, Some(PodWatchEvent::Error(_))));
    }
}
