//! Collaborator Ports - 外部协作者
//!
//! recipe 源码检出、模型下载/上传、镜像构建不属于编排核心，这里只定义边界。
//! 每次调用都携带当前操作的标签，便于协作者创建带相同 recipe-id/model-id 的子任务

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::container_engine::EngineConnection;
use crate::domain::{BuiltImage, Labels, ModelInfo, Recipe};

/// 协作者错误
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Checkout failed: {0}")]
    Checkout(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Build failed: {0}")]
    Build(String),
}

/// Recipe 源码
#[async_trait]
pub trait RecipeSourcePort: Send + Sync {
    /// 检出 recipe 仓库，返回 recipe 根目录
    async fn checkout(&self, recipe: &Recipe, labels: &Labels) -> Result<PathBuf, CollaboratorError>;
}

/// 模型文件
#[async_trait]
pub trait ModelStorePort: Send + Sync {
    /// 确保模型已下载到本地，返回本地文件路径
    async fn download(&self, model: &ModelInfo, labels: &Labels) -> Result<PathBuf, CollaboratorError>;

    /// 把本地模型上传到执行目标，返回目标上的路径
    async fn upload(
        &self,
        connection: &EngineConnection,
        local_path: &Path,
        labels: &Labels,
    ) -> Result<PathBuf, CollaboratorError>;
}

/// 镜像构建
#[async_trait]
pub trait ImageBuilderPort: Send + Sync {
    /// 构建 recipe 的全部镜像
    async fn build(
        &self,
        connection: &EngineConnection,
        recipe: &Recipe,
        recipe_dir: &Path,
        labels: &Labels,
    ) -> Result<Vec<BuiltImage>, CollaboratorError>;
}
