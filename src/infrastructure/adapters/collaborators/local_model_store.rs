//! Local Model Store - 把模型下载到本地目录
//!
//! 下载先写入 `.part` 临时文件，完成后再改名，中断的下载不会被当作可用文件。
//! 本地引擎直接绑定挂载宿主机文件，上传是恒等映射

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

use crate::application::ports::{CollaboratorError, EngineConnection, ModelStorePort};
use crate::domain::labels::LABEL_MODEL_ID;
use crate::domain::{Labels, ModelInfo};

fn download_error(e: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::Download(e.to_string())
}

pub struct LocalModelStore {
    models_dir: PathBuf,
    client: Client,
}

impl LocalModelStore {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            client: Client::new(),
        }
    }

    fn target_path(&self, model: &ModelInfo) -> Option<PathBuf> {
        model
            .file_name()
            .map(|file| self.models_dir.join(&model.id).join(file))
    }

    async fn fetch(&self, url: &str, target: &Path) -> Result<u64, CollaboratorError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(download_error)?;
        }
        let response = self.client.get(url).send().await.map_err(download_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Download(format!("HTTP {} for {}", status, url)));
        }

        let partial = target.with_extension("part");
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(download_error)?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        let mut reader = StreamReader::new(stream);
        let written = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(download_error)?;
        file.flush().await.map_err(download_error)?;
        drop(file);
        tokio::fs::rename(&partial, target)
            .await
            .map_err(download_error)?;
        Ok(written)
    }
}

#[async_trait]
impl ModelStorePort for LocalModelStore {
    async fn download(&self, model: &ModelInfo, labels: &Labels) -> Result<PathBuf, CollaboratorError> {
        if let Some(file) = &model.file {
            let path = file.full_path();
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(path);
            }
        }

        let target = self.target_path(model).ok_or_else(|| {
            CollaboratorError::Download(format!("model {} has no file name", model.id))
        })?;
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Ok(target);
        }
        let url = model.url.as_deref().ok_or_else(|| {
            CollaboratorError::Download(format!("model {} has no download url", model.id))
        })?;

        tracing::info!(
            model_id = ?labels.get(LABEL_MODEL_ID),
            url = %url,
            path = %target.display(),
            "Downloading model"
        );
        let bytes = self.fetch(url, &target).await?;
        tracing::info!(model = %model.id, bytes, "Model downloaded");
        Ok(target)
    }

    async fn upload(
        &self,
        _connection: &EngineConnection,
        local_path: &Path,
        _labels: &Labels,
    ) -> Result<PathBuf, CollaboratorError> {
        Ok(local_path.to_path_buf())
    }
}
