//! Applications - 多容器应用编排

mod manager;
mod wiring;

pub use manager::{ApplicationCollaborators, ApplicationManager, ApplicationManagerConfig};
pub use wiring::{PodBlueprint, PodPlan};
