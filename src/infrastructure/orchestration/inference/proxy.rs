//! Port-Forward Proxy
//!
//! 集群内 Pod 端口不可直接访问：本地监听一个 TCP 端口，每个接入的连接都经集群 port-forward 流转发到 Pod。
//! `destroy` 同时关闭监听和所有已接入的连接

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::application::ports::ClusterPort;

pub struct PortForwardProxy {
    pod_name: String,
    local_port: u16,
    open_connections: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl PortForwardProxy {
    /// 在 `local_port` 上监听（0 表示由系统分配），转发到 Pod 的 `target_port`
    pub async fn start(
        cluster: Arc<dyn ClusterPort>,
        pod_name: &str,
        target_port: u16,
        local_port: u16,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", local_port)).await?;
        let local_port = listener.local_addr()?.port();
        let cancel = CancellationToken::new();
        let open_connections = Arc::new(AtomicUsize::new(0));

        let token = cancel.clone();
        let counter = open_connections.clone();
        let pod = pod_name.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((socket, peer)) => {
                            tracing::debug!(pod = %pod, peer = %peer, "Proxy connection accepted");
                            tokio::spawn(forward(
                                cluster.clone(),
                                pod.clone(),
                                target_port,
                                socket,
                                token.child_token(),
                                counter.clone(),
                            ));
                        }
                        Err(e) => tracing::warn!(pod = %pod, error = %e, "Proxy accept failed"),
                    },
                }
            }
            tracing::debug!(pod = %pod, "Proxy listener closed");
        });

        tracing::info!(pod = %pod_name, local_port, target_port, "Port-forward proxy started");
        Ok(Self {
            pod_name: pod_name.to_string(),
            local_port,
            open_connections,
            cancel,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn pod_name(&self) -> &str {
        &self.pod_name
    }

    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }

    /// 关闭监听与全部已接入连接
    pub fn destroy(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!(pod = %self.pod_name, local_port = self.local_port, "Port-forward proxy destroyed");
        }
        self.cancel.cancel();
    }
}

impl Drop for PortForwardProxy {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn forward(
    cluster: Arc<dyn ClusterPort>,
    pod_name: String,
    target_port: u16,
    mut socket: TcpStream,
    cancel: CancellationToken,
    counter: Arc<AtomicUsize>,
) {
    let mut upstream = match cluster.port_forward(&pod_name, target_port).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(pod = %pod_name, error = %e, "Cannot open port-forward stream");
            return;
        }
    };

    counter.fetch_add(1, Ordering::SeqCst);
    tokio::select! {
        _ = cancel.cancelled() => {}
        result = tokio::io::copy_bidirectional(&mut socket, &mut upstream) => {
            if let Err(e) = result {
                tracing::debug!(pod = %pod_name, error = %e, "Proxy connection closed with error");
            }
        }
    }
    counter.fetch_sub(1, Ordering::SeqCst);
}
