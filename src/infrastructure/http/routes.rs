//! HTTP Routes
//!
//! API Endpoints:
//! - /api/ping                      GET   健康检查
//! - /api/tasks                     GET   所有任务
//! - /api/tasks/query               POST  按标签查询任务
//! - /api/tasks/delete              POST  按标签删除任务
//! - /api/applications              GET   应用列表
//! - /api/applications/pull         POST  拉取并启动应用（返回 trackingId）
//! - /api/applications/start        POST  启动应用
//! - /api/applications/stop         POST  停止应用
//! - /api/applications/remove       POST  删除应用
//! - /api/applications/restart      POST  重启应用（返回 trackingId）
//! - /api/applications/ports        POST  应用端口
//! - /api/inference                 GET   推理服务列表
//! - /api/inference/create          POST  创建推理服务（返回 trackingId）
//! - /api/inference/start           POST  启动推理服务
//! - /api/inference/stop            POST  停止推理服务
//! - /api/inference/delete          POST  删除推理服务
//! - /ws/events                     WS    UI 事件推送

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

/// 创建所有路由
pub fn create_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/api", api_routes())
        .route("/ws/events", get(handlers::events_websocket_handler))
}

/// API 路由
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ping", get(handlers::ping))
        .nest("/tasks", task_routes())
        .nest("/applications", application_routes())
        .nest("/inference", inference_routes())
}

/// Task 路由
fn task_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::list_tasks))
        .route("/query", post(handlers::query_tasks))
        .route("/delete", post(handlers::delete_tasks))
}

/// Application 路由
fn application_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::list_applications))
        .route("/pull", post(handlers::pull_application))
        .route("/start", post(handlers::start_application))
        .route("/stop", post(handlers::stop_application))
        .route("/remove", post(handlers::remove_application))
        .route("/restart", post(handlers::restart_application))
        .route("/ports", post(handlers::application_ports))
}

/// Inference 路由
fn inference_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::list_inference_servers))
        .route("/create", post(handlers::create_inference_server))
        .route("/start", post(handlers::start_inference_server))
        .route("/stop", post(handlers::stop_inference_server))
        .route("/delete", post(handlers::delete_inference_server))
}
