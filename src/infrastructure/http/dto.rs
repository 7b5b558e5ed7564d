//! Data Transfer Objects

use serde::{Deserialize, Serialize};

use crate::domain::{AppKey, ApplicationOptions, Labels};

// ============================================================================
// 统一响应结构
// ============================================================================

/// 统一 API 响应格式
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub errno: i32,
    pub error: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// 成功响应
    pub fn success(data: T) -> Self {
        Self {
            errno: 0,
            error: String::new(),
            data: Some(data),
        }
    }

    /// 错误响应
    #[allow(dead_code)]
    pub fn error(errno: i32, error: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            errno,
            error: error.into(),
            data: None,
        }
    }
}

/// 空数据响应
#[derive(Debug, Serialize)]
pub struct Empty {}

impl ApiResponse<Empty> {
    /// 成功但无数据
    pub fn ok() -> Self {
        Self {
            errno: 0,
            error: String::new(),
            data: Some(Empty {}),
        }
    }
}

// ============================================================================
// Task DTOs
// ============================================================================

/// 按标签查询/删除任务
#[derive(Debug, Deserialize)]
pub struct LabelsRequest {
    #[serde(default)]
    pub labels: Labels,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: usize,
}

/// 后台操作的 trackingId
#[derive(Debug, Serialize)]
pub struct TrackingResponse {
    pub tracking_id: String,
}

// ============================================================================
// Application DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AppKeyRequest {
    pub recipe_id: String,
    pub model_id: String,
}

impl From<AppKeyRequest> for AppKey {
    fn from(req: AppKeyRequest) -> Self {
        AppKey::new(req.recipe_id, req.model_id)
    }
}

/// pull / restart 请求：recipe + 模型，附加标签会写入所有相关任务
#[derive(Debug, Deserialize)]
pub struct ApplicationRequest {
    #[serde(flatten)]
    pub options: ApplicationOptions,
    #[serde(default)]
    pub labels: Labels,
}

#[derive(Debug, Serialize)]
pub struct PortsResponse {
    pub ports: Vec<u16>,
}

// ============================================================================
// Inference DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerIdRequest {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_request_flattens_options() {
        let req: ApplicationRequest = serde_json::from_str(
            r#"{
                "recipe": {
                    "id": "chatbot",
                    "name": "ChatBot",
                    "repository": "https://example.com/recipes.git",
                    "components": []
                },
                "labels": {"origin": "ui"}
            }"#,
        )
        .unwrap();
        assert_eq!(req.options.recipe.id, "chatbot");
        assert!(req.options.model.is_none());
        assert_eq!(req.labels.get("origin").map(String::as_str), Some("ui"));
    }

    #[test]
    fn test_success_envelope() {
        let body = serde_json::to_value(ApiResponse::success(TrackingResponse {
            tracking_id: "t1".to_string(),
        }))
        .unwrap();
        assert_eq!(body["errno"], 0);
        assert_eq!(body["error"], "");
        assert_eq!(body["data"]["tracking_id"], "t1");
    }
}
