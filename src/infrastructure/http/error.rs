//! HTTP Error Handling
//!
//! 业务错误一律返回 HTTP 200，错误码放在 `errno` 字段

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::application::{ClusterError, EngineError, OrchestratorError};

/// 统一错误响应格式
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub errno: i32,
    pub error: String,
    pub data: Option<()>,
}

impl ErrorResponse {
    pub fn new(errno: i32, error: impl Into<String>) -> Self {
        Self {
            errno,
            error: error.into(),
            data: None,
        }
    }
}

/// 错误码定义
pub mod errno {
    pub const BAD_REQUEST: i32 = 400;
    pub const NOT_FOUND: i32 = 404;
    pub const CONFLICT: i32 = 409;
    pub const INTERNAL_ERROR: i32 = 500;
    pub const SERVICE_UNAVAILABLE: i32 = 503;
}

/// API 错误
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
    Conflict(String),
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, response) = match &self {
            ApiError::NotFound(msg) => {
                tracing::warn!(errno = errno::NOT_FOUND, error = %msg, "Resource not found");
                (
                    StatusCode::OK,
                    ErrorResponse::new(errno::NOT_FOUND, msg.clone()),
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(errno = errno::BAD_REQUEST, error = %msg, "Bad request");
                (
                    StatusCode::OK,
                    ErrorResponse::new(errno::BAD_REQUEST, msg.clone()),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(errno = errno::INTERNAL_ERROR, error = %msg, "Internal server error");
                (
                    StatusCode::OK,
                    ErrorResponse::new(errno::INTERNAL_ERROR, msg.clone()),
                )
            }
            ApiError::Conflict(msg) => {
                tracing::warn!(errno = errno::CONFLICT, error = %msg, "Resource conflict");
                (
                    StatusCode::OK,
                    ErrorResponse::new(errno::CONFLICT, msg.clone()),
                )
            }
            ApiError::ServiceUnavailable(msg) => {
                tracing::error!(errno = errno::SERVICE_UNAVAILABLE, error = %msg, "Service unavailable");
                (
                    StatusCode::OK,
                    ErrorResponse::new(errno::SERVICE_UNAVAILABLE, msg.clone()),
                )
            }
        };

        (status, Json(response)).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            OrchestratorError::Transitioning { .. } => ApiError::Conflict(e.to_string()),
            OrchestratorError::Validation(_)
            | OrchestratorError::NoProvider(_)
            | OrchestratorError::Unsupported(_) => ApiError::BadRequest(e.to_string()),
            OrchestratorError::Engine(EngineError::NotFound(_))
            | OrchestratorError::Cluster(ClusterError::NotFound(_)) => {
                ApiError::NotFound(e.to_string())
            }
            OrchestratorError::Engine(_)
            | OrchestratorError::Cluster(_)
            | OrchestratorError::Timeout(_) => ApiError::ServiceUnavailable(e.to_string()),
            OrchestratorError::Collaborator(_) | OrchestratorError::Internal(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn envelope(error: ApiError) -> serde_json::Value {
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_transitioning_maps_to_conflict() {
        let error: ApiError = OrchestratorError::Transitioning {
            id: "c1".to_string(),
            status: "stopping",
        }
        .into();
        let body = envelope(error).await;
        assert_eq!(body["errno"], errno::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("stopping"));
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn test_error_classes() {
        let not_found: ApiError = OrchestratorError::not_found("Inference server", "c9").into();
        assert_eq!(envelope(not_found).await["errno"], errno::NOT_FOUND);

        let engine_missing: ApiError =
            OrchestratorError::Engine(EngineError::NotFound("pod p1".to_string())).into();
        assert_eq!(envelope(engine_missing).await["errno"], errno::NOT_FOUND);

        let no_provider: ApiError = OrchestratorError::NoProvider("mixed".to_string()).into();
        assert_eq!(envelope(no_provider).await["errno"], errno::BAD_REQUEST);

        let timeout: ApiError = OrchestratorError::Timeout("pod".to_string()).into();
        assert_eq!(envelope(timeout).await["errno"], errno::SERVICE_UNAVAILABLE);

        let internal: ApiError = OrchestratorError::internal("boom").into();
        assert_eq!(envelope(internal).await["errno"], errno::INTERNAL_ERROR);
    }
}
