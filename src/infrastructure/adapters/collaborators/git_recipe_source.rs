//! Git Recipe Source - 用 git 命令检出 recipe 仓库
//!
//! 仓库按 recipe id 克隆到 `recipes_dir/<id>`，已存在时只切换到指定 reference

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::application::ports::{CollaboratorError, RecipeSourcePort};
use crate::domain::labels::LABEL_RECIPE_ID;
use crate::domain::{Labels, Recipe};

pub struct GitRecipeSource {
    recipes_dir: PathBuf,
    git: String,
}

impl GitRecipeSource {
    pub fn new(recipes_dir: impl Into<PathBuf>) -> Self {
        Self {
            recipes_dir: recipes_dir.into(),
            git: "git".to_string(),
        }
    }

    /// 指定 git 可执行文件
    pub fn with_git(mut self, git: impl Into<String>) -> Self {
        self.git = git.into();
        self
    }

    async fn run(&self, args: &[&str], cwd: Option<&Path>) -> Result<(), CollaboratorError> {
        let mut command = Command::new(&self.git);
        command.args(args);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        let output = command
            .output()
            .await
            .map_err(|e| CollaboratorError::Checkout(format!("cannot run {}: {}", self.git, e)))?;
        if !output.status.success() {
            return Err(CollaboratorError::Checkout(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

fn recipe_root(checkout: &Path, recipe: &Recipe) -> PathBuf {
    match recipe.base_path.as_deref().filter(|p| !p.is_empty()) {
        Some(base) => checkout.join(base),
        None => checkout.to_path_buf(),
    }
}

#[async_trait]
impl RecipeSourcePort for GitRecipeSource {
    async fn checkout(&self, recipe: &Recipe, labels: &Labels) -> Result<PathBuf, CollaboratorError> {
        let target = self.recipes_dir.join(&recipe.id);

        if target.join(".git").exists() {
            tracing::debug!(
                recipe_id = ?labels.get(LABEL_RECIPE_ID),
                path = %target.display(),
                "Recipe repository already checked out"
            );
            if let Some(reference) = &recipe.reference {
                self.run(&["checkout", reference], Some(&target)).await?;
            }
        } else {
            tokio::fs::create_dir_all(&self.recipes_dir)
                .await
                .map_err(|e| CollaboratorError::Checkout(e.to_string()))?;
            let target_str = target.to_string_lossy().to_string();
            let mut args = vec!["clone", "--depth", "1"];
            if let Some(reference) = &recipe.reference {
                args.extend(["--branch", reference.as_str()]);
            }
            args.extend([recipe.repository.as_str(), target_str.as_str()]);

            tracing::info!(repository = %recipe.repository, path = %target.display(), "Cloning recipe repository");
            self.run(&args, None).await?;
        }

        Ok(recipe_root(&target, recipe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe(base_path: Option<&str>) -> Recipe {
        Recipe {
            id: "chatbot".to_string(),
            name: "ChatBot".to_string(),
            repository: "https://example.invalid/recipes.git".to_string(),
            reference: None,
            base_path: base_path.map(|p| p.to_string()),
            components: vec![],
            model_endpoint: None,
        }
    }

    #[tokio::test]
    async fn test_existing_checkout_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("chatbot/.git")).unwrap();
        let source = GitRecipeSource::new(dir.path()).with_git("/nonexistent/git");

        let root = source
            .checkout(&recipe(Some("recipes/natural_language_processing/chatbot")), &Labels::new())
            .await
            .unwrap();
        assert_eq!(
            root,
            dir.path()
                .join("chatbot/recipes/natural_language_processing/chatbot")
        );
    }

    #[tokio::test]
    async fn test_clone_failure_is_checkout_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = GitRecipeSource::new(dir.path()).with_git("/nonexistent/git");
        assert!(matches!(
            source.checkout(&recipe(None), &Labels::new()).await,
            Err(CollaboratorError::Checkout(_))
        ));
    }
}
