//! 编排层错误定义
//!
//! 三类失败：
//! - 操作失败：单个长时操作失败，记录到任务
//! - 对账失败：后台刷新失败，有限重试，不直接暴露给用户
//! - 前置条件/冲突：实体不存在或正处于过渡状态，同步拒绝

use thiserror::Error;

use super::ports::{ClusterError, CollaboratorError, EngineError};

/// 编排层错误
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// 资源未找到
    #[error("{resource_type} not found: {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// 实体正处于过渡状态
    #[error("{id} is currently {status}, try again later")]
    Transitioning { id: String, status: &'static str },

    /// 没有可用的 provider
    #[error("No provider available: {0}")]
    NoProvider(String),

    /// 验证错误
    #[error("Validation error: {0}")]
    Validation(String),

    /// 等待超时
    #[error("Timeout: {0}")]
    Timeout(String),

    /// 当前后端不支持的操作
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// 容器引擎错误
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// 集群错误
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// 外部协作者错误
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// 创建 NotFound 错误
    pub fn not_found(resource_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type,
            id: id.into(),
        }
    }

    /// 创建验证错误
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// 是否属于前置条件/冲突类错误
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Transitioning { .. })
    }
}
