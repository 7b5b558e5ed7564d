//! Events - 引擎事件总线与 UI 通知

mod container_events;
mod publisher;

pub use container_events::{ContainerEventBus, ContainerSubscription};
pub use publisher::{
    EventPublisher, UiEvent, CHANNEL_APPLICATIONS, CHANNEL_INFERENCE_SERVERS, CHANNEL_TASKS,
};
