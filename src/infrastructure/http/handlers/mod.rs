//! HTTP Handlers

mod applications;
mod inference;
mod ping;
mod tasks;
mod websocket;

pub use applications::*;
pub use inference::*;
pub use ping::*;
pub use tasks::*;
pub use websocket::*;
