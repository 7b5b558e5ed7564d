//! Health - 容器与 Pod 健康状态
//!
//! Pod 健康状态不单独存储，而是由组成 Pod 的所有容器健康状态按优先级归约：
//! unhealthy > starting > healthy > none

use serde::{Deserialize, Serialize};

/// 容器健康状态（引擎上报）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerHealth {
    Healthy,
    Unhealthy,
    Starting,
    /// 未配置健康检查或引擎返回未知值
    Unknown,
}

impl ContainerHealth {
    /// 从引擎返回的字符串解析
    pub fn from_engine(value: Option<&str>) -> Self {
        match value {
            Some("healthy") => ContainerHealth::Healthy,
            Some("unhealthy") => ContainerHealth::Unhealthy,
            Some("starting") => ContainerHealth::Starting,
            _ => ContainerHealth::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerHealth::Healthy => "healthy",
            ContainerHealth::Unhealthy => "unhealthy",
            ContainerHealth::Starting => "starting",
            ContainerHealth::Unknown => "unknown",
        }
    }
}

/// Pod 聚合健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodHealth {
    /// Pod 中没有容器
    None,
    Healthy,
    Starting,
    Unhealthy,
}

impl PodHealth {
    /// 按优先级归约所有容器的健康状态
    pub fn aggregate<I>(healths: I) -> Self
    where
        I: IntoIterator<Item = ContainerHealth>,
    {
        let mut result = PodHealth::None;
        for health in healths {
            match health {
                ContainerHealth::Unhealthy => return PodHealth::Unhealthy,
                ContainerHealth::Starting | ContainerHealth::Unknown => {
                    result = PodHealth::Starting;
                }
                ContainerHealth::Healthy => {
                    if result == PodHealth::None {
                        result = PodHealth::Healthy;
                    }
                }
            }
        }
        result
    }

    /// 直接对引擎字符串归约
    pub fn from_engine_values<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self::aggregate(
            values
                .into_iter()
                .map(|v| ContainerHealth::from_engine(Some(v))),
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PodHealth::None => "none",
            PodHealth::Healthy => "healthy",
            PodHealth::Starting => "starting",
            PodHealth::Unhealthy => "unhealthy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_pod_has_no_health() {
        assert_eq!(PodHealth::from_engine_values(Vec::<&str>::new()), PodHealth::None);
    }

    #[test]
    fn test_single_healthy() {
        assert_eq!(PodHealth::from_engine_values(["healthy"]), PodHealth::Healthy);
    }

    #[test]
    fn test_starting_over_healthy() {
        assert_eq!(
            PodHealth::from_engine_values(["healthy", "healthy", "starting"]),
            PodHealth::Starting
        );
    }

    #[test]
    fn test_unhealthy_dominates() {
        assert_eq!(
            PodHealth::from_engine_values(["healthy", "unhealthy", "healthy", "starting"]),
            PodHealth::Unhealthy
        );
    }

    #[test]
    fn test_unknown_counts_as_starting() {
        assert_eq!(
            PodHealth::aggregate([ContainerHealth::Healthy, ContainerHealth::Unknown]),
            PodHealth::Starting
        );
        assert_eq!(ContainerHealth::from_engine(None), ContainerHealth::Unknown);
        assert_eq!(ContainerHealth::from_engine(Some("")), ContainerHealth::Unknown);
    }
}
