//! Container Engine Adapters

mod fake_engine;
mod podman_client;

pub use fake_engine::FakeContainerEngine;
pub use podman_client::{PodmanClient, PodmanClientConfig};
#[cfg(test)]
pub(crate) use podman_client::parse_event_line;
