//! Application layer - Generic services that use ports.

pub mod tasks;
pub mod worker;
