use async_trait::async_trait;

use crate::domain::task::{Task, TaskStatus, TaskUpdate, WriteOutcome};
use crate::domain::video::VideoRecord;
use crate::error::StoreError;

/// Maximum number of log lines kept per task.
pub const LOG_CAPACITY: usize = 100;

/// Canonical task records and their log rings.
///
/// Every write stamps `updated_at` so that it strictly increases per task.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Store a full record
    async fn create_task(&self, task: &Task) -> Result<(), StoreError>;

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError>;

    /// Unconditional partial update. Fails with `StoreError::NotFound` when
    /// the task does not exist.
    async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        update: TaskUpdate,
    ) -> Result<(), StoreError>;

    /// Partial update applied atomically, and only while the task is in one
    /// of the `from` statuses.
    async fn transition_task(
        &self,
        id: &str,
        from: &[TaskStatus],
        to: TaskStatus,
        update: TaskUpdate,
    ) -> Result<WriteOutcome, StoreError>;

    /// Progress (and optionally speed) for a task that is still in `phase`.
    async fn update_progress(
        &self,
        id: &str,
        phase: TaskStatus,
        progress: u8,
        speed: Option<String>,
    ) -> Result<WriteOutcome, StoreError> {
        let mut update = TaskUpdate::new().progress(progress);
        if let Some(speed) = speed {
            update = update.speed(speed);
        }
        self.transition_task(id, &[phase], phase, update).await
    }

    /// Tasks whose record exists at the time it is read. Tasks deleted
    /// while listing are left out.
    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// Remove the record and its logs. Returns whether a record existed.
    async fn delete_task(&self, id: &str) -> Result<bool, StoreError>;

    /// Prepend a timestamped line, keeping the newest `LOG_CAPACITY`.
    /// Lines for tasks that no longer exist are dropped.
    async fn append_log(&self, id: &str, message: &str) -> Result<(), StoreError>;

    /// Log lines, newest first
    async fn get_logs(&self, id: &str) -> Result<Vec<String>, StoreError>;
}

/// Finished artifacts.
#[async_trait]
pub trait VideoCatalog: Send + Sync {
    async fn save_video(&self, video: &VideoRecord) -> Result<(), StoreError>;

    async fn list_videos(&self) -> Result<Vec<VideoRecord>, StoreError>;
}

/// Formats a log line the way it is stored: `[YYYY-mm-dd HH:MM:SS] message`
/// in local time.
pub fn format_log_line(message: &str) -> String {
    format!(
        "[{}] {message}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}
