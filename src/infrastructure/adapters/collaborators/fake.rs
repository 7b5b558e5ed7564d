//! Fake Collaborators - 内存中的 recipe 源、模型仓库与镜像构建器
//!
//! 不访问网络也不调用外部命令，只记录收到的标签，用于测试与本地演示

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::application::ports::{
    CollaboratorError, EngineConnection, ImageBuilderPort, ModelStorePort, RecipeSourcePort,
};
use crate::domain::{BuiltImage, Labels, ModelInfo, Recipe};

fn record(calls: &Mutex<Vec<Labels>>, labels: &Labels) {
    if let Ok(mut calls) = calls.lock() {
        calls.push(labels.clone());
    }
}

fn recorded(calls: &Mutex<Vec<Labels>>) -> Vec<Labels> {
    calls.lock().map(|c| c.clone()).unwrap_or_default()
}

/// Fake recipe 源
#[derive(Default)]
pub struct FakeRecipeSource {
    calls: Mutex<Vec<Labels>>,
}

impl FakeRecipeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次 checkout 收到的标签
    pub fn calls(&self) -> Vec<Labels> {
        recorded(&self.calls)
    }
}

#[async_trait]
impl RecipeSourcePort for FakeRecipeSource {
    async fn checkout(&self, recipe: &Recipe, labels: &Labels) -> Result<PathBuf, CollaboratorError> {
        record(&self.calls, labels);
        Ok(PathBuf::from("/recipes").join(&recipe.id))
    }
}

/// Fake 模型仓库
#[derive(Default)]
pub struct FakeModelStore {
    downloads: Mutex<Vec<Labels>>,
    uploads: Mutex<Vec<Labels>>,
    fail_download: bool,
}

impl FakeModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_download: true,
            ..Default::default()
        }
    }

    pub fn downloads(&self) -> Vec<Labels> {
        recorded(&self.downloads)
    }

    pub fn uploads(&self) -> Vec<Labels> {
        recorded(&self.uploads)
    }
}

#[async_trait]
impl ModelStorePort for FakeModelStore {
    async fn download(&self, model: &ModelInfo, labels: &Labels) -> Result<PathBuf, CollaboratorError> {
        record(&self.downloads, labels);
        if self.fail_download {
            return Err(CollaboratorError::Download(format!(
                "model {} is unreachable",
                model.id
            )));
        }
        let file = model.file_name().unwrap_or_else(|| model.id.clone());
        Ok(PathBuf::from("/models").join(&model.id).join(file))
    }

    async fn upload(
        &self,
        _connection: &EngineConnection,
        local_path: &Path,
        labels: &Labels,
    ) -> Result<PathBuf, CollaboratorError> {
        record(&self.uploads, labels);
        Ok(local_path.to_path_buf())
    }
}

/// Fake 镜像构建器：每个 recipe 组件对应一个镜像
#[derive(Default)]
pub struct FakeImageBuilder {
    calls: Mutex<Vec<Labels>>,
}

impl FakeImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Labels> {
        recorded(&self.calls)
    }
}

#[async_trait]
impl ImageBuilderPort for FakeImageBuilder {
    async fn build(
        &self,
        _connection: &EngineConnection,
        recipe: &Recipe,
        _recipe_dir: &Path,
        labels: &Labels,
    ) -> Result<Vec<BuiltImage>, CollaboratorError> {
        record(&self.calls, labels);
        Ok(recipe
            .components
            .iter()
            .map(|component| BuiltImage {
                id: format!("localhost/{}-{}:latest", recipe.id, component.name),
                app_name: component.name.clone(),
                model_service: component.model_service,
                ports: component.ports.clone(),
            })
            .collect())
    }
}
