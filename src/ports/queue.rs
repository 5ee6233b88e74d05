use std::time::Duration;

use async_trait::async_trait;

use crate::domain::task::Task;
use crate::error::StoreError;

/// FIFO of task snapshots waiting for a worker.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Append a task at the back of the queue
    async fn enqueue(&self, task: &Task) -> Result<(), StoreError>;

    /// Pop the oldest entry; `None` when the queue is empty
    async fn dequeue(&self) -> Result<Option<Task>, StoreError>;

    /// Pop the oldest entry, waiting up to `timeout` for one to arrive.
    /// Safe for concurrent consumers: each entry is handed to exactly one.
    async fn dequeue_blocking(&self, timeout: Duration) -> Result<Option<Task>, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;
}
