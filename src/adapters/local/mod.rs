//! Local adapters for a single-host deployment.

pub mod direct;
pub mod fetcher;
pub mod fs;
pub mod http;
pub mod redis;

pub use direct::DirectResolver;
pub use fetcher::{FetchConfig, Fetcher};
pub use fs::LocalStorage;
pub use redis::RedisPool;
