//! Task Handlers

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::application::Task;
use crate::infrastructure::http::dto::{ApiResponse, DeletedResponse, LabelsRequest};
use crate::infrastructure::http::error::ApiError;
use crate::infrastructure::http::state::AppState;

/// 所有任务
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<Task>>> {
    Json(ApiResponse::success(state.task_manager.get_tasks()))
}

/// 标签子集匹配查询（通常按 trackingId 轮询）
pub async fn query_tasks(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LabelsRequest>,
) -> Result<Json<ApiResponse<Vec<Task>>>, ApiError> {
    Ok(Json(ApiResponse::success(
        state.task_manager.get_tasks_by_labels(&req.labels),
    )))
}

pub async fn delete_tasks(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LabelsRequest>,
) -> Result<Json<ApiResponse<DeletedResponse>>, ApiError> {
    // 空标签会匹配全部任务
    if req.labels.is_empty() {
        return Err(ApiError::BadRequest("labels must not be empty".to_string()));
    }
    let deleted = state.task_manager.delete_by_labels(&req.labels);
    tracing::debug!(deleted, "Tasks deleted by labels");
    Ok(Json(ApiResponse::success(DeletedResponse { deleted })))
}
