//! Fake Cluster - 内存中的 Kubernetes 集群
//!
//! Pod 创建后处于 Pending，需要测试显式推进 phase；删除时先推送带 deletionTimestamp 的 MODIFIED，再推送 DELETED。
//! port-forward 返回一个回显流

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::application::ports::{
    ClusterContext, ClusterError, ClusterPod, ClusterPort, PersistentVolumeClaim, PodStatus,
    PodWatchEvent,
};
use crate::domain::labels::matches_labels;
use crate::domain::Labels;

struct Watcher {
    selector: Labels,
    sender: mpsc::Sender<PodWatchEvent>,
}

/// Fake Cluster
pub struct FakeCluster {
    context: ClusterContext,
    /// name -> pod
    pods: DashMap<String, ClusterPod>,
    watchers: Mutex<Vec<Watcher>>,
    failures: DashMap<String, String>,
    pvcs: Mutex<Vec<PersistentVolumeClaim>>,
    port_forwards: Mutex<Vec<(String, u16)>>,
    counter: AtomicU64,
}

/// 解析 `a=1,b=2` 形式的选择器
fn parse_selector(selector: &str) -> Labels {
    selector
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

impl FakeCluster {
    pub fn new() -> Self {
        tracing::info!("FakeCluster initialized");
        Self {
            context: ClusterContext {
                name: "fake-context".to_string(),
                namespace: "default".to_string(),
            },
            pods: DashMap::new(),
            watchers: Mutex::new(Vec::new()),
            failures: DashMap::new(),
            pvcs: Mutex::new(Vec::new()),
            port_forwards: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// 让指定操作返回错误，直到 `clear_failure`
    pub fn fail(&self, operation: &str, message: &str) {
        self.failures
            .insert(operation.to_string(), message.to_string());
    }

    pub fn clear_failure(&self, operation: &str) {
        self.failures.remove(operation);
    }

    fn check(&self, operation: &str) -> Result<(), ClusterError> {
        match self.failures.get(operation) {
            Some(message) => Err(ClusterError::Api {
                status: 500,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn pod(&self, name: &str) -> Option<ClusterPod> {
        self.pods.get(name).map(|p| p.clone())
    }

    pub fn pod_names(&self) -> Vec<String> {
        self.pods.iter().map(|p| p.key().clone()).collect()
    }

    pub fn pvcs(&self) -> Vec<PersistentVolumeClaim> {
        self.pvcs
            .lock()
            .map(|pvcs| pvcs.clone())
            .unwrap_or_default()
    }

    pub fn port_forwards(&self) -> Vec<(String, u16)> {
        self.port_forwards
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// 推进 Pod 的 phase 并推送 MODIFIED
    pub fn set_phase(&self, name: &str, phase: &str) {
        let updated = self.pods.get_mut(name).map(|mut pod| {
            pod.status
                .get_or_insert_with(PodStatus::default)
                .phase = Some(phase.to_string());
            pod.clone()
        });
        if let Some(pod) = updated {
            self.emit(PodWatchEvent::Modified(pod));
        }
    }

    /// 关闭所有 watch 流（模拟 API server 断开）
    pub fn close_watches(&self) {
        if let Ok(mut watchers) = self.watchers.lock() {
            watchers.clear();
        }
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// 推送给选择器匹配的 watch，已关闭的接收端被移除
    pub fn emit(&self, event: PodWatchEvent) {
        let labels = match &event {
            PodWatchEvent::Added(pod) | PodWatchEvent::Modified(pod) | PodWatchEvent::Deleted(pod) => {
                pod.metadata.labels.clone().unwrap_or_default()
            }
            PodWatchEvent::Error(_) => Labels::new(),
        };
        let is_error = matches!(event, PodWatchEvent::Error(_));

        if let Ok(mut watchers) = self.watchers.lock() {
            watchers.retain(|watcher| {
                if !is_error && !matches_labels(&labels, &watcher.selector) {
                    return !watcher.sender.is_closed();
                }
                match watcher.sender.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!("Fake watch channel full, dropping event");
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            });
        }
    }
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterPort for FakeCluster {
    fn context(&self) -> ClusterContext {
        self.context.clone()
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<ClusterPod>, ClusterError> {
        self.check("list_pods")?;
        let query = parse_selector(selector);
        Ok(self
            .pods
            .iter()
            .filter(|pod| {
                pod.metadata
                    .labels
                    .as_ref()
                    .is_some_and(|labels| matches_labels(labels, &query))
            })
            .map(|pod| pod.clone())
            .collect())
    }

    async fn create_pod(&self, mut pod: ClusterPod) -> Result<ClusterPod, ClusterError> {
        self.check("create_pod")?;
        let name = match (&pod.metadata.name, &pod.metadata.generate_name) {
            (Some(name), _) => name.clone(),
            (None, Some(prefix)) => {
                format!("{}{}", prefix, self.counter.fetch_add(1, Ordering::SeqCst))
            }
            (None, None) => {
                return Err(ClusterError::Api {
                    status: 422,
                    message: "name or generateName is required".to_string(),
                })
            }
        };
        if self.pods.contains_key(&name) {
            return Err(ClusterError::Api {
                status: 409,
                message: format!("pods \"{}\" already exists", name),
            });
        }

        pod.metadata.name = Some(name.clone());
        pod.metadata.uid = Some(Uuid::new_v4().to_string());
        pod.metadata.namespace = Some(self.context.namespace.clone());
        pod.status = Some(PodStatus {
            phase: Some("Pending".to_string()),
            container_statuses: vec![],
        });

        self.pods.insert(name, pod.clone());
        self.emit(PodWatchEvent::Added(pod.clone()));
        Ok(pod)
    }

    async fn delete_pod(&self, name: &str) -> Result<(), ClusterError> {
        self.check("delete_pod")?;
        let mut pod = self
            .pods
            .get(name)
            .map(|p| p.clone())
            .ok_or_else(|| ClusterError::NotFound(format!("pod {}", name)))?;

        pod.metadata.deletion_timestamp = Some(Utc::now().to_rfc3339());
        self.emit(PodWatchEvent::Modified(pod.clone()));
        self.pods.remove(name);
        self.emit(PodWatchEvent::Deleted(pod));
        Ok(())
    }

    async fn create_pvc(&self, pvc: PersistentVolumeClaim) -> Result<(), ClusterError> {
        self.check("create_pvc")?;
        let mut pvcs = self
            .pvcs
            .lock()
            .map_err(|_| ClusterError::Connection("pvc store poisoned".to_string()))?;
        if pvcs.iter().any(|p| p.metadata.name == pvc.metadata.name) {
            return Err(ClusterError::Api {
                status: 409,
                message: "persistentvolumeclaim already exists".to_string(),
            });
        }
        pvcs.push(pvc);
        Ok(())
    }

    async fn watch_pods(
        &self,
        selector: &str,
    ) -> Result<mpsc::Receiver<PodWatchEvent>, ClusterError> {
        self.check("watch_pods")?;
        let (sender, receiver) = mpsc::channel(256);
        if let Ok(mut watchers) = self.watchers.lock() {
            watchers.push(Watcher {
                selector: parse_selector(selector),
                sender,
            });
        }
        Ok(receiver)
    }

    async fn port_forward(&self, pod_name: &str, port: u16) -> Result<DuplexStream, ClusterError> {
        self.check("port_forward")?;
        if let Ok(mut calls) = self.port_forwards.lock() {
            calls.push((pod_name.to_string(), port));
        }

        let (local, remote) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(remote);
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
        });
        Ok(local)
    }
}
