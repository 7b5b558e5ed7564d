//! Cluster Adapters

mod fake_cluster;
mod kube_client;
pub mod port_forward;

pub use fake_cluster::FakeCluster;
pub use kube_client::{KubeClient, KubeClientConfig};
