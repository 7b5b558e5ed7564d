//! Memory Layer - In-Memory State Management
//!
//! 实现 TaskManager 和 ApplicationRegistry，管理任务和应用索引的内存状态

mod application_registry;
mod task_manager;

pub use application_registry::ApplicationRegistry;
pub use task_manager::InMemoryTaskManager;
