//! Label Schema
//!
//! Pod/容器上的字符串标签是跨进程唯一的索引，这里集中定义所有标签键以及匹配规则

use std::collections::HashMap;

/// 标签集合
pub type Labels = HashMap<String, String>;

/// 应用所属的 recipe
pub const LABEL_RECIPE_ID: &str = "recipe-id";

/// 应用所使用的 model
pub const LABEL_MODEL_ID: &str = "model-id";

/// 关联一次请求派生出的所有任务
pub const LABEL_TRACKING_ID: &str = "trackingId";

/// 推理服务容器标签，值为所服务 model id 的 JSON 数组
pub const LABEL_INFERENCE_SERVER: &str = "ai-lab-inference-server";

/// Pod 上 model service 暴露的本地端口（逗号分隔）
pub const LABEL_MODEL_PORTS: &str = "ai-lab-model-ports";

/// Pod 上应用暴露的本地端口（逗号分隔）
pub const LABEL_APP_PORTS: &str = "ai-lab-app-ports";

/// 推理服务使用的后端类型
pub const LABEL_INFERENCE_BACKEND: &str = "ai-lab-inference-backend";

/// 推理服务创建成功后写入主任务的容器 ID
pub const LABEL_CONTAINER_ID: &str = "containerId";

/// Kubernetes 注解：所服务的 model id
pub const ANNOTATION_MODEL_ID: &str = "ai-lab/model-id";

/// Kubernetes 注解：调用方选定的本地端口（proxy 需要在每次 reconcile 时复用）
pub const ANNOTATION_LOCAL_PORT: &str = "ai-lab/port";

/// Kubernetes 上所有受管 Pod 的标签选择器
pub const CLUSTER_SELECTOR_KEY: &str = "app.kubernetes.io/managed-by";
pub const CLUSTER_SELECTOR_VALUE: &str = "ai-lab";

/// 未声明 model 时写入 `model-id` 的占位值
pub const NO_MODEL: &str = "<none>";

/// 子集匹配：query 中每个键值对都存在于 labels 中
pub fn matches_labels(labels: &Labels, query: &Labels) -> bool {
    query
        .iter()
        .all(|(key, value)| labels.get(key).is_some_and(|v| v == value))
}

/// 标签选择器字符串，如 `a=1,b=2`
pub fn cluster_selector() -> String {
    format!("{}={}", CLUSTER_SELECTOR_KEY, CLUSTER_SELECTOR_VALUE)
}

/// 将端口列表编码为标签值
pub fn join_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// 解析逗号分隔的端口标签，无法解析的部分直接跳过
pub fn parse_ports(value: Option<&String>) -> Vec<u16> {
    value
        .map(|v| {
            v.split(',')
                .filter_map(|p| p.trim().parse::<u16>().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// 构造 `recipe-id` + `model-id` 查询
pub fn app_labels(recipe_id: &str, model_id: &str) -> Labels {
    Labels::from([
        (LABEL_RECIPE_ID.to_string(), recipe_id.to_string()),
        (LABEL_MODEL_ID.to_string(), model_id.to_string()),
    ])
}
