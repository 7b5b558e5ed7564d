//! Collaborator Adapters - recipe 检出、模型下载、镜像构建

mod fake;
mod git_recipe_source;
mod local_model_store;
mod podman_image_builder;

pub use fake::{FakeImageBuilder, FakeModelStore, FakeRecipeSource};
pub use git_recipe_source::GitRecipeSource;
pub use local_model_store::LocalModelStore;
pub use podman_image_builder::{image_tag, PodmanImageBuilder};
