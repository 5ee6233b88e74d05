//! Domain layer - Pure business logic.

pub mod av;
pub mod credential;
pub mod naming;
pub mod platform;
pub mod progress;
pub mod task;
pub mod video;
