use std::path::PathBuf;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use super::platform::{ContentCategory, Platform};

/// Lifecycle of a task.
///
/// `pending -> downloading -> transcoding -> completed`, with `failed`
/// reachable from either working phase. `paused` and `cancelled` are set
/// by users; a worker holding such a task stops at its next status check.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Transcoding,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    pub platform: Platform,
    pub content_category: ContentCategory,
    pub status: TaskStatus,
    pub progress: u8,
    pub download_speed: Option<String>,
    pub save_path: Option<PathBuf>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A fresh pending task for `url`, with platform and category detected
    /// from the URL.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let now = now_micros();
        Self {
            id: Uuid::new_v4().to_string(),
            platform: Platform::detect(&url),
            content_category: ContentCategory::detect(&url),
            url,
            title: None,
            status: TaskStatus::Pending,
            progress: 0,
            download_speed: None,
            save_path: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a status change in place and stamps `updated_at`.
    pub fn apply(&mut self, status: TaskStatus, update: &TaskUpdate, now: DateTime<Utc>) {
        self.status = status;
        if let Some(progress) = update.progress {
            self.progress = progress.min(100);
        }
        if let Some(path) = &update.save_path {
            self.save_path = Some(path.clone());
        }
        if update.clear_error {
            self.error_message = None;
        }
        if let Some(message) = &update.error_message {
            self.error_message = Some(message.clone());
        }
        if let Some(title) = &update.title {
            self.title = Some(title.clone());
        }
        if let Some(category) = update.content_category {
            self.content_category = category;
        }
        if update.clear_speed {
            self.download_speed = None;
        }
        if let Some(speed) = &update.download_speed {
            self.download_speed = Some(speed.clone());
        }
        self.updated_at = next_stamp(self.updated_at, now);
    }
}

/// Current time truncated to the microsecond precision the stores keep.
pub fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// The next `updated_at` value: wall-clock time, but always at least one
/// microsecond after the previous stamp.
pub fn next_stamp(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + TimeDelta::microseconds(1);
    if now > floor {
        now
    } else {
        floor
    }
}

/// Partial update carried alongside a status change. Unset fields are left
/// untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub progress: Option<u8>,
    pub save_path: Option<PathBuf>,
    pub error_message: Option<String>,
    pub clear_error: bool,
    pub title: Option<String>,
    /// Category reported by the resolver, replacing the URL-based guess.
    pub content_category: Option<ContentCategory>,
    pub download_speed: Option<String>,
    pub clear_speed: bool,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn save_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_path = Some(path.into());
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Drops any stored error message, so a retried task does not show the
    /// previous failure.
    pub fn clear_error(mut self) -> Self {
        self.clear_error = true;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn content_category(mut self, category: ContentCategory) -> Self {
        self.content_category = Some(category);
        self
    }

    pub fn speed(mut self, speed: impl Into<String>) -> Self {
        self.download_speed = Some(speed.into());
        self
    }

    pub fn clear_speed(mut self) -> Self {
        self.clear_speed = true;
        self
    }
}

/// Result of a write that is conditional on the task's current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The task was in a different status, which is returned.
    Superseded(TaskStatus),
    /// The task was deleted.
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_pending_at_zero() {
        let task = Task::new("https://www.bilibili.com/video/BV1xx411c7mD");

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert_eq!(task.platform, Platform::Bilibili);
        assert!(task.error_message.is_none());
        assert_eq!(task.created_at, task.updated_at);
    }

    #[test]
    fn ids_are_unique() {
        let a = Task::new("https://example.com/a");
        let b = Task::new("https://example.com/a");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn apply_stamps_strictly_increasing_time_even_with_a_stale_clock() {
        let mut task = Task::new("https://example.com/v/1");
        let before = task.updated_at;

        task.apply(TaskStatus::Downloading, &TaskUpdate::new(), before);
        assert!(task.updated_at > before);

        let second = task.updated_at;
        task.apply(
            TaskStatus::Transcoding,
            &TaskUpdate::new(),
            before - TimeDelta::seconds(5),
        );
        assert!(task.updated_at > second);
    }

    #[test]
    fn clear_error_then_set_keeps_the_new_message() {
        let mut task = Task::new("https://example.com/v/1");
        task.error_message = Some("old".into());

        task.apply(
            TaskStatus::Failed,
            &TaskUpdate::new().clear_error().error("new"),
            Utc::now(),
        );
        assert_eq!(task.error_message.as_deref(), Some("new"));

        task.apply(TaskStatus::Pending, &TaskUpdate::new().clear_error(), Utc::now());
        assert!(task.error_message.is_none());
    }

    #[test]
    fn resolver_category_replaces_the_detected_one() {
        let mut task = Task::new("https://www.bilibili.com/video/BV1xx411c7mD");
        assert_eq!(task.content_category, ContentCategory::ShortVideo);

        task.apply(TaskStatus::Downloading, &TaskUpdate::new().title("t"), Utc::now());
        assert_eq!(task.content_category, ContentCategory::ShortVideo);

        task.apply(
            TaskStatus::Downloading,
            &TaskUpdate::new().content_category(ContentCategory::Series),
            Utc::now(),
        );
        assert_eq!(task.content_category, ContentCategory::Series);
    }

    #[test]
    fn progress_is_clamped() {
        let update = TaskUpdate::new().progress(250);
        assert_eq!(update.progress, Some(100));
    }

    #[test]
    fn status_round_trips_through_its_string_form() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Downloading,
            TaskStatus::Transcoding,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Paused,
            TaskStatus::Cancelled,
        ] {
            let text = status.to_string();
            assert_eq!(text.parse::<TaskStatus>().ok(), Some(status));
        }
        assert_eq!(TaskStatus::Downloading.as_ref(), "downloading");
    }
}
