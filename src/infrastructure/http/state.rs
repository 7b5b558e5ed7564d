//! Application State
//!
//! HTTP 层共享的编排器句柄

use std::sync::Arc;

use crate::application::TaskManagerPort;
use crate::infrastructure::events::EventPublisher;
use crate::infrastructure::orchestration::{ApplicationManager, InferenceOrchestrator};

/// 应用状态
pub struct AppState {
    pub task_manager: Arc<dyn TaskManagerPort>,
    pub event_publisher: Arc<EventPublisher>,
    pub applications: Arc<ApplicationManager>,
    pub inference: InferenceOrchestrator,
}

impl AppState {
    pub fn new(
        task_manager: Arc<dyn TaskManagerPort>,
        event_publisher: Arc<EventPublisher>,
        applications: Arc<ApplicationManager>,
        inference: InferenceOrchestrator,
    ) -> Self {
        Self {
            task_manager,
            event_publisher,
            applications,
            inference,
        }
    }
}
