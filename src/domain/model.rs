//! Model - 模型元数据
//!
//! 模型目录的加载与磁盘文件管理不属于本服务，这里只描述编排需要的字段

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use super::labels::NO_MODEL;

/// 推理后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InferenceType {
    LlamaCpp,
    WhisperCpp,
    None,
}

impl InferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceType::LlamaCpp => "llama-cpp",
            InferenceType::WhisperCpp => "whisper-cpp",
            InferenceType::None => "none",
        }
    }

    /// 从标签值解析，未知值视为 None
    pub fn from_label(value: &str) -> Self {
        match value {
            "llama-cpp" => InferenceType::LlamaCpp,
            "whisper-cpp" => InferenceType::WhisperCpp,
            _ => InferenceType::None,
        }
    }
}

impl Default for InferenceType {
    fn default() -> Self {
        InferenceType::None
    }
}

/// 本地模型文件位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFile {
    /// 所在目录
    pub path: PathBuf,
    /// 文件名
    pub file: String,
}

impl ModelFile {
    pub fn full_path(&self) -> PathBuf {
        self.path.join(&self.file)
    }
}

/// 模型信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub backend: InferenceType,
    /// 已下载到本地的文件
    #[serde(default)]
    pub file: Option<ModelFile>,
    /// 下载地址
    #[serde(default)]
    pub url: Option<String>,
    /// 内存占用（字节）
    #[serde(default)]
    pub memory: Option<u64>,
    /// 额外属性，作为环境变量传给 model service
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, backend: InferenceType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            backend,
            file: None,
            url: None,
            memory: None,
            properties: HashMap::new(),
        }
    }

    /// 是否声明了文件来源（本地路径或下载地址）
    pub fn is_declared(&self) -> bool {
        self.file.is_some() || self.url.is_some()
    }

    /// 文件名：优先本地文件，否则取 URL 最后一段
    pub fn file_name(&self) -> Option<String> {
        if let Some(file) = &self.file {
            return Some(file.file.clone());
        }
        self.url
            .as_deref()
            .and_then(|url| url.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .map(|name| name.to_string())
    }

    /// 把 properties 转为 model service 的环境变量（`MODEL_<KEY>=value`）
    pub fn properties_env(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self
            .properties
            .iter()
            .map(|(key, value)| {
                let key = key
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                    .collect::<String>();
                (format!("MODEL_{}", key), value.clone())
            })
            .collect();
        env.sort();
        env
    }
}

/// `model-id` 标签值：未请求模型或模型没有声明本地文件路径时使用 `<none>`
pub fn model_label(model: Option<&ModelInfo>) -> String {
    model
        .filter(|m| m.file.is_some())
        .map(|m| m.id.clone())
        .unwrap_or_else(|| NO_MODEL.to_string())
}

/// 所有模型共同的后端；为空或混合后端时返回 None
pub fn common_backend(models: &[ModelInfo]) -> Option<InferenceType> {
    let mut backends = models.iter().map(|m| m.backend);
    let first = backends.next()?;
    if backends.all(|b| b == first) {
        Some(first)
    } else {
        None
    }
}
