use serde::Serialize;
use tracing::info;
use url::Url;

use crate::domain::credential::Credential;
use crate::domain::platform::Platform;
use crate::domain::task::{Task, TaskStatus, TaskUpdate, WriteOutcome};
use crate::domain::video::VideoRecord;
use crate::error::TaskError;
use crate::ports::Store;

/// Whether a platform currently has a usable login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    pub platform: Platform,
    pub valid: bool,
}

/// The operations clients perform on tasks. Store failures surface to the
/// caller unchanged.
pub struct TaskService<S> {
    store: S,
}

impl<S: Store> TaskService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Stores a new pending task and queues it. URLs from unrecognised
    /// sites are accepted with platform `unknown`.
    pub async fn create(&self, url: &str) -> Result<Task, TaskError> {
        let url = url.trim();
        let parsed = Url::parse(url).map_err(|e| TaskError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TaskError::InvalidUrl(format!(
                "{url}: only http and https links are accepted"
            )));
        }

        let task = Task::new(url);
        self.store.create_task(&task).await?;
        self.store
            .append_log(&task.id, &format!("Task created (platform: {})", task.platform))
            .await?;
        self.store.enqueue(&task).await?;
        info!(task_id = %task.id, platform = %task.platform, "task created");
        Ok(task)
    }

    pub async fn get(&self, id: &str) -> Result<Task, TaskError> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    /// All tasks, newest first.
    pub async fn list(&self) -> Result<Vec<Task>, TaskError> {
        let mut tasks = self.store.list_tasks().await?;
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    /// `failed -> pending`, clearing the stored error, and back into the
    /// queue behind everything already waiting.
    pub async fn retry(&self, id: &str) -> Result<Task, TaskError> {
        let update = TaskUpdate::new().clear_error().clear_speed();
        self.move_task(id, &[TaskStatus::Failed], TaskStatus::Pending, update)
            .await?;
        let task = self.requeue(id).await?;
        self.store.append_log(id, "Task re-queued for retry").await?;
        info!(task_id = %id, "task retried");
        Ok(task)
    }

    /// Stops a task before or during processing. A worker holding it stops
    /// at its next status check.
    pub async fn pause(&self, id: &str) -> Result<Task, TaskError> {
        self.move_task(
            id,
            &[
                TaskStatus::Pending,
                TaskStatus::Downloading,
                TaskStatus::Transcoding,
            ],
            TaskStatus::Paused,
            TaskUpdate::new().clear_speed(),
        )
        .await?;
        self.store.append_log(id, "Task paused").await?;
        self.get(id).await
    }

    /// `paused -> pending`, queued again.
    pub async fn resume(&self, id: &str) -> Result<Task, TaskError> {
        self.move_task(
            id,
            &[TaskStatus::Paused],
            TaskStatus::Pending,
            TaskUpdate::new(),
        )
        .await?;
        let task = self.requeue(id).await?;
        self.store.append_log(id, "Task resumed").await?;
        Ok(task)
    }

    pub async fn cancel(&self, id: &str) -> Result<Task, TaskError> {
        self.move_task(
            id,
            &[
                TaskStatus::Pending,
                TaskStatus::Paused,
                TaskStatus::Downloading,
                TaskStatus::Transcoding,
            ],
            TaskStatus::Cancelled,
            TaskUpdate::new().clear_speed(),
        )
        .await?;
        self.store.append_log(id, "Task cancelled").await?;
        self.get(id).await
    }

    /// Removes the task and its logs. Deleting an absent task is not an
    /// error; the return value says whether anything was removed.
    pub async fn delete(&self, id: &str) -> Result<bool, TaskError> {
        let removed = self.store.delete_task(id).await?;
        if removed {
            info!(task_id = %id, "task deleted");
        }
        Ok(removed)
    }

    pub async fn logs(&self, id: &str) -> Result<Vec<String>, TaskError> {
        self.get(id).await?;
        Ok(self.store.get_logs(id).await?)
    }

    pub async fn videos(&self) -> Result<Vec<VideoRecord>, TaskError> {
        Ok(self.store.list_videos().await?)
    }

    pub async fn credential_status(&self) -> Result<Vec<CredentialStatus>, TaskError> {
        let mut statuses = Vec::new();
        for platform in Platform::known() {
            statuses.push(CredentialStatus {
                platform,
                valid: self.store.is_valid(platform).await?,
            });
        }
        Ok(statuses)
    }

    /// Stores a cookie string pasted by the user as the platform's login.
    pub async fn login_manual(&self, platform: Platform, cookie: &str) -> Result<(), TaskError> {
        if platform == Platform::Unknown {
            return Err(TaskError::InvalidInput(
                "cannot store credentials for an unknown platform".into(),
            ));
        }
        if cookie.trim().is_empty() {
            return Err(TaskError::InvalidInput("cookie must not be empty".into()));
        }
        let credential = Credential::from_cookie_string(platform, cookie);
        if credential.cookie_header(platform).is_none() {
            return Err(TaskError::InvalidInput("cookie carries no usable value".into()));
        }
        self.store.set_credential(platform, &credential).await?;
        info!(%platform, "credential stored");
        Ok(())
    }

    async fn move_task(
        &self,
        id: &str,
        from: &[TaskStatus],
        to: TaskStatus,
        update: TaskUpdate,
    ) -> Result<(), TaskError> {
        match self.store.transition_task(id, from, to, update).await? {
            WriteOutcome::Applied => Ok(()),
            WriteOutcome::Superseded(current) => Err(TaskError::InvalidTransition { from: current, to }),
            WriteOutcome::Missing => Err(TaskError::NotFound(id.to_string())),
        }
    }

    async fn requeue(&self, id: &str) -> Result<Task, TaskError> {
        let task = self.get(id).await?;
        self.store.enqueue(&task).await?;
        Ok(task)
    }
}
