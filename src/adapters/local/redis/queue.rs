//! Redis TaskQueue implementation.
//!
//! Entries are pushed on the left and popped on the right, so the list
//! behaves as a FIFO.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::AsyncCommands;

use super::pool::RedisPool;
use super::DOWNLOAD_QUEUE;
use crate::domain::task::Task;
use crate::error::StoreError;
use crate::ports::queue::TaskQueue;

#[async_trait]
impl TaskQueue for RedisPool {
    async fn enqueue(&self, task: &Task) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let json = serde_json::to_string(task)?;
        conn.lpush::<_, _, ()>(DOWNLOAD_QUEUE, json).await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Task>, StoreError> {
        let mut conn = self.conn().await?;
        let json: Option<String> = conn.rpop(DOWNLOAD_QUEUE, None).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn dequeue_blocking(&self, timeout: Duration) -> Result<Option<Task>, StoreError> {
        let mut conn = self.conn().await?;
        // BRPOP treats 0 as "wait forever".
        let timeout_secs = timeout.as_secs_f64().max(0.01);
        let result: Option<(String, String)> = conn.brpop(DOWNLOAD_QUEUE, timeout_secs).await?;
        match result {
            Some((_, json)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(DOWNLOAD_QUEUE).await?)
    }
}
