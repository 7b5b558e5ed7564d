//! Inference Server Handlers

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::domain::{InferenceServer, InferenceServerConfig};
use crate::infrastructure::http::dto::{ApiResponse, Empty, ServerIdRequest, TrackingResponse};
use crate::infrastructure::http::error::ApiError;
use crate::infrastructure::http::state::AppState;

pub async fn list_inference_servers(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<InferenceServer>>> {
    Json(ApiResponse::success(state.inference.get_servers()))
}

/// 后台创建推理服务；成功后该 trackingId 的主任务带上 containerId 标签
pub async fn create_inference_server(
    State(state): State<Arc<AppState>>,
    Json(config): Json<InferenceServerConfig>,
) -> Result<Json<ApiResponse<TrackingResponse>>, ApiError> {
    if config.models.is_empty() {
        return Err(ApiError::BadRequest(
            "at least one model is required".to_string(),
        ));
    }
    let tracking_id = state.inference.request_create(config);
    tracing::info!(
        tracking_id = %tracking_id,
        backend = state.inference.kind(),
        "Inference server creation requested"
    );
    Ok(Json(ApiResponse::success(TrackingResponse { tracking_id })))
}

pub async fn start_inference_server(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ServerIdRequest>,
) -> Result<Json<ApiResponse<Empty>>, ApiError> {
    state.inference.start_server(&req.id).await?;
    Ok(Json(ApiResponse::ok()))
}

pub async fn stop_inference_server(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ServerIdRequest>,
) -> Result<Json<ApiResponse<Empty>>, ApiError> {
    state.inference.stop_server(&req.id).await?;
    Ok(Json(ApiResponse::ok()))
}

pub async fn delete_inference_server(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ServerIdRequest>,
) -> Result<Json<ApiResponse<Empty>>, ApiError> {
    state.inference.delete_server(&req.id).await?;
    Ok(Json(ApiResponse::ok()))
}
