//! Podman Image Builder - 调用 `podman build` 构建 recipe 镜像
//!
//! 各组件并发构建，全部完成后再汇总；任一失败则整体失败

use async_trait::async_trait;
use futures_util::future::join_all;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::application::ports::{CollaboratorError, EngineConnection, ImageBuilderPort};
use crate::domain::labels::LABEL_RECIPE_ID;
use crate::domain::{BuiltImage, Labels, Recipe, RecipeComponent};

pub struct PodmanImageBuilder {
    podman: String,
}

impl PodmanImageBuilder {
    pub fn new() -> Self {
        Self {
            podman: "podman".to_string(),
        }
    }

    pub fn with_podman(mut self, podman: impl Into<String>) -> Self {
        self.podman = podman.into();
        self
    }

    async fn build_component(
        &self,
        connection: &EngineConnection,
        tag: &str,
        context: &Path,
        containerfile: &Path,
    ) -> Result<(), CollaboratorError> {
        let mut command = Command::new(&self.podman);
        if connection.id != "podman" && !connection.id.is_empty() {
            command.args(["--connection", connection.id.as_str()]);
        }
        command
            .arg("build")
            .arg("-t")
            .arg(tag)
            .arg("-f")
            .arg(containerfile)
            .arg(context);

        tracing::info!(tag = %tag, context = %context.display(), "Building image");
        let output = command
            .output()
            .await
            .map_err(|e| CollaboratorError::Build(format!("cannot run {}: {}", self.podman, e)))?;
        if !output.status.success() {
            return Err(CollaboratorError::Build(format!(
                "{}: {}",
                tag,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl Default for PodmanImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 镜像 tag：`localhost/<recipe>-<component>:latest`，小写
pub fn image_tag(recipe: &Recipe, component: &RecipeComponent) -> String {
    format!("localhost/{}-{}:latest", recipe.id, component.name).to_lowercase()
}

fn component_paths(recipe_dir: &Path, component: &RecipeComponent) -> (PathBuf, PathBuf) {
    let context = recipe_dir.join(&component.context_dir);
    let containerfile = context.join(&component.containerfile);
    (context, containerfile)
}

#[async_trait]
impl ImageBuilderPort for PodmanImageBuilder {
    async fn build(
        &self,
        connection: &EngineConnection,
        recipe: &Recipe,
        recipe_dir: &Path,
        labels: &Labels,
    ) -> Result<Vec<BuiltImage>, CollaboratorError> {
        tracing::debug!(
            recipe_id = ?labels.get(LABEL_RECIPE_ID),
            components = recipe.components.len(),
            "Building recipe images"
        );

        let builds = recipe.components.iter().map(|component| async move {
            let tag = image_tag(recipe, component);
            let (context, containerfile) = component_paths(recipe_dir, component);
            self.build_component(connection, &tag, &context, &containerfile)
                .await
                .map(|()| BuiltImage {
                    id: tag,
                    app_name: component.name.clone(),
                    model_service: component.model_service,
                    ports: component.ports.clone(),
                })
        });

        join_all(builds).await.into_iter().collect()
    }
}
