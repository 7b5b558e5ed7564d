//! Pods - Pod 查询/命令封装与健康归约

mod pod_manager;

pub use pod_manager::{PodEvent, PodManager};
