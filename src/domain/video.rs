use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::platform::Platform;
use super::task::Task;

/// A finished artifact. Outlives the task that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub task_id: String,
    pub title: String,
    pub platform: Platform,
    pub save_path: PathBuf,
    /// True when transcoding failed and the raw download was kept instead.
    #[serde(default)]
    pub raw: bool,
    pub created_at: DateTime<Utc>,
}

impl VideoRecord {
    pub fn for_task(task: &Task, title: &str, save_path: PathBuf, raw: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            title: title.to_string(),
            platform: task.platform,
            save_path,
            raw,
            created_at: Utc::now(),
        }
    }
}
