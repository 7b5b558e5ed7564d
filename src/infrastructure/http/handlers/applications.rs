//! Application Handlers

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::domain::{AppKey, ApplicationState};
use crate::infrastructure::http::dto::{
    ApiResponse, AppKeyRequest, ApplicationRequest, Empty, PortsResponse, TrackingResponse,
};
use crate::infrastructure::http::error::ApiError;
use crate::infrastructure::http::state::AppState;

pub async fn list_applications(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<ApplicationState>>> {
    Json(ApiResponse::success(state.applications.get_applications()))
}

/// 后台拉取并启动应用，返回 trackingId
pub async fn pull_application(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ApplicationRequest>,
) -> Result<Json<ApiResponse<TrackingResponse>>, ApiError> {
    validate_options(&req)?;
    let tracking_id = state
        .applications
        .request_pull_application(req.options, req.labels);
    Ok(Json(ApiResponse::success(TrackingResponse { tracking_id })))
}

pub async fn restart_application(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ApplicationRequest>,
) -> Result<Json<ApiResponse<TrackingResponse>>, ApiError> {
    validate_options(&req)?;
    let tracking_id = state
        .applications
        .request_restart_application(req.options, req.labels);
    Ok(Json(ApiResponse::success(TrackingResponse { tracking_id })))
}

pub async fn start_application(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AppKeyRequest>,
) -> Result<Json<ApiResponse<Empty>>, ApiError> {
    let key: AppKey = req.into();
    state.applications.start_application(&key).await?;
    Ok(Json(ApiResponse::ok()))
}

pub async fn stop_application(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AppKeyRequest>,
) -> Result<Json<ApiResponse<Empty>>, ApiError> {
    let key: AppKey = req.into();
    state.applications.stop_application(&key).await?;
    Ok(Json(ApiResponse::ok()))
}

pub async fn remove_application(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AppKeyRequest>,
) -> Result<Json<ApiResponse<Empty>>, ApiError> {
    let key: AppKey = req.into();
    state.applications.remove_application(&key).await?;
    Ok(Json(ApiResponse::ok()))
}

/// 应用容器映射到本地的端口
pub async fn application_ports(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AppKeyRequest>,
) -> Result<Json<ApiResponse<PortsResponse>>, ApiError> {
    let key: AppKey = req.into();
    let ports = state.applications.get_application_ports(&key)?;
    Ok(Json(ApiResponse::success(PortsResponse { ports })))
}

fn validate_options(req: &ApplicationRequest) -> Result<(), ApiError> {
    if req.options.recipe.id.trim().is_empty() {
        return Err(ApiError::BadRequest("recipe id is required".to_string()));
    }
    if req.options.recipe.components.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "recipe {} declares no components",
            req.options.recipe.id
        )));
    }
    Ok(())
}
