//! Redis connection pool.

use std::path::PathBuf;
use std::time::Duration;

use deadpool_redis::{Config, Connection, Pool, Runtime};

use crate::error::StoreError;

/// Redis-backed adapter for every store port.
#[derive(Clone)]
pub struct RedisPool {
    pool: Pool,
    pub(super) cookie_ttl: Duration,
    pub(super) default_root: PathBuf,
}

impl RedisPool {
    /// Create a new RedisPool with connection pool.
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self {
            pool,
            cookie_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            default_root: PathBuf::from("."),
        })
    }

    /// How long stored credentials stay valid.
    pub fn with_cookie_ttl(mut self, ttl: Duration) -> Self {
        self.cookie_ttl = ttl;
        self
    }

    /// Storage root used until one is configured in Redis.
    pub fn with_default_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.default_root = root.into();
        self
    }

    pub(super) async fn conn(&self) -> Result<Connection, StoreError> {
        Ok(self.pool.get().await?)
    }
}
