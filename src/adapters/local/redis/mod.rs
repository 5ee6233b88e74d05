//! Redis adapter for local deployment.
//!
//! This module provides Redis-backed implementations of:
//! - `TaskRepository` and `VideoCatalog` for task and video records
//! - `TaskQueue` for the download queue
//! - `CredentialStore` and `StoragePathProvider`

mod codec;
mod credentials;
mod pool;
mod queue;
mod repository;

pub use pool::RedisPool;

/// Redis key constants
const TASK_PREFIX: &str = "vidpipe:task:";
const TASK_LOGS_PREFIX: &str = "vidpipe:task_logs:";
const DOWNLOAD_QUEUE: &str = "vidpipe:download_queue";
const VIDEO_PREFIX: &str = "vidpipe:video:";
const COOKIE_PREFIX: &str = "vidpipe:cookie:";
const STORAGE_PATH_KEY: &str = "vidpipe:config:storage_path";

fn task_key(id: &str) -> String {
    format!("{TASK_PREFIX}{id}")
}

fn logs_key(id: &str) -> String {
    format!("{TASK_LOGS_PREFIX}{id}")
}
