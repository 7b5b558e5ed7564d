//! Application - 由 recipe 实例化出的多容器应用
//!
//! 一个应用对应一个 Pod，Pod 中每个 recipe 镜像对应一个容器

use serde::{Deserialize, Serialize};
use std::fmt;

use super::health::PodHealth;
use super::model::{model_label, ModelInfo};

/// Recipe 中的一个镜像组件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeComponent {
    pub name: String,
    /// Containerfile 路径（相对于 context_dir）
    #[serde(default = "default_containerfile")]
    pub containerfile: String,
    /// 构建上下文目录（相对于 recipe 根目录）
    #[serde(default)]
    pub context_dir: String,
    /// 是否为 model service（负责加载模型）
    #[serde(default)]
    pub model_service: bool,
    /// 容器暴露的端口
    #[serde(default)]
    pub ports: Vec<u16>,
}

fn default_containerfile() -> String {
    "Containerfile".to_string()
}

/// Recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    /// 源码仓库
    pub repository: String,
    #[serde(default)]
    pub reference: Option<String>,
    /// 仓库内的子目录
    #[serde(default)]
    pub base_path: Option<String>,
    pub components: Vec<RecipeComponent>,
    /// 外部推理服务地址；声明后应用容器不再指向本地 model service
    #[serde(default)]
    pub model_endpoint: Option<String>,
}

/// 构建完成的镜像
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltImage {
    /// 镜像 tag
    pub id: String,
    pub app_name: String,
    pub model_service: bool,
    pub ports: Vec<u16>,
}

/// pull 应用的参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationOptions {
    pub recipe: Recipe,
    #[serde(default)]
    pub model: Option<ModelInfo>,
}

impl ApplicationOptions {
    /// 需要下载/挂载的模型
    pub fn requested_model(&self) -> Option<&ModelInfo> {
        self.model.as_ref()
    }

    pub fn key(&self) -> AppKey {
        AppKey::new(&self.recipe.id, model_label(self.model.as_ref()))
    }
}

/// 应用索引键 (recipe, model)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppKey {
    pub recipe_id: String,
    pub model_id: String,
}

impl AppKey {
    pub fn new(recipe_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            recipe_id: recipe_id.into(),
            model_id: model_id.into(),
        }
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.recipe_id, self.model_id)
    }
}

/// 应用运行状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationState {
    pub recipe_id: String,
    pub model_id: String,
    pub pod_id: String,
    pub pod_name: String,
    pub engine_id: String,
    pub pod_status: String,
    pub health: PodHealth,
    pub app_ports: Vec<u16>,
    pub model_ports: Vec<u16>,
}

impl ApplicationState {
    pub fn key(&self) -> AppKey {
        AppKey::new(&self.recipe_id, &self.model_id)
    }
}
