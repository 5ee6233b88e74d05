//! Task records as flat Redis hashes.
//!
//! Optional fields are absent from the hash when unset. Timestamps are
//! microseconds since the Unix epoch so the update script can compare them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::domain::platform::{ContentCategory, Platform};
use crate::domain::task::{Task, TaskStatus, TaskUpdate};
use crate::error::StoreError;

pub(super) const UPDATED_AT: &str = "updated_at";

pub(super) fn task_to_fields(task: &Task) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("id", task.id.clone()),
        ("url", task.url.clone()),
        ("platform", task.platform.to_string()),
        ("content_category", task.content_category.to_string()),
        ("status", task.status.to_string()),
        ("progress", task.progress.to_string()),
        ("created_at", task.created_at.timestamp_micros().to_string()),
        (UPDATED_AT, task.updated_at.timestamp_micros().to_string()),
    ];
    if let Some(title) = &task.title {
        fields.push(("title", title.clone()));
    }
    if let Some(speed) = &task.download_speed {
        fields.push(("download_speed", speed.clone()));
    }
    if let Some(path) = &task.save_path {
        fields.push(("save_path", path.to_string_lossy().into_owned()));
    }
    if let Some(message) = &task.error_message {
        fields.push(("error_message", message.clone()));
    }
    fields
}

/// Fields to delete and fields to set for a status change, in the order
/// the update script applies them (deletes first).
pub(super) fn update_to_fields(
    status: TaskStatus,
    update: &TaskUpdate,
) -> (Vec<&'static str>, Vec<(&'static str, String)>) {
    let mut clear = Vec::new();
    if update.clear_error {
        clear.push("error_message");
    }
    if update.clear_speed {
        clear.push("download_speed");
    }

    let mut set = vec![("status", status.to_string())];
    if let Some(progress) = update.progress {
        set.push(("progress", progress.min(100).to_string()));
    }
    if let Some(path) = &update.save_path {
        set.push(("save_path", path.to_string_lossy().into_owned()));
    }
    if let Some(message) = &update.error_message {
        set.push(("error_message", message.clone()));
    }
    if let Some(title) = &update.title {
        set.push(("title", title.clone()));
    }
    if let Some(category) = update.content_category {
        set.push(("content_category", category.to_string()));
    }
    if let Some(speed) = &update.download_speed {
        set.push(("download_speed", speed.clone()));
    }
    (clear, set)
}

pub(super) fn task_from_fields(
    key: &str,
    mut fields: HashMap<String, String>,
) -> Result<Task, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        key: key.to_string(),
        reason,
    };
    let mut required = |name: &str| {
        fields
            .remove(name)
            .ok_or_else(|| corrupt(format!("missing field {name}")))
    };

    let id = required("id")?;
    let url = required("url")?;
    let platform: Platform = parse(&required("platform")?, "platform").map_err(&corrupt)?;
    let content_category: ContentCategory =
        parse(&required("content_category")?, "content_category").map_err(&corrupt)?;
    let status: TaskStatus = parse(&required("status")?, "status").map_err(&corrupt)?;
    let progress: u8 = parse(&required("progress")?, "progress").map_err(&corrupt)?;
    let created_at = micros(&required("created_at")?).map_err(&corrupt)?;
    let updated_at = micros(&required(UPDATED_AT)?).map_err(&corrupt)?;

    Ok(Task {
        id,
        url,
        title: fields.remove("title"),
        platform,
        content_category,
        status,
        progress: progress.min(100),
        download_speed: fields.remove("download_speed"),
        save_path: fields.remove("save_path").map(PathBuf::from),
        error_message: fields.remove("error_message"),
        created_at,
        updated_at,
    })
}

fn parse<T: FromStr>(value: &str, field: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("invalid {field}: {value:?}"))
}

fn micros(value: &str) -> Result<DateTime<Utc>, String> {
    value
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_micros)
        .ok_or_else(|| format!("invalid timestamp: {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_map(fields: Vec<(&'static str, String)>) -> HashMap<String, String> {
        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn hash_preserves_every_task_field() {
        let mut task = Task::new("https://v.douyin.com/abc/");
        task.title = Some("clip".into());
        task.status = TaskStatus::Failed;
        task.progress = 37;
        task.download_speed = Some("1.00 MB/s".into());
        task.save_path = Some(PathBuf::from("/data/douyin/clip/clip.mov"));
        task.error_message = Some("[DownloadError] boom\n\nResolved media URL: https://cdn".into());

        let decoded = task_from_fields("vidpipe:task:x", as_map(task_to_fields(&task))).unwrap();
        assert_eq!(decoded, task);
        assert_eq!(decoded.platform, Platform::Douyin);
    }

    #[test]
    fn missing_required_field_is_corrupt() {
        let task = Task::new("https://example.com/v/1");
        let mut fields = as_map(task_to_fields(&task));
        fields.remove("status");

        let err = task_from_fields("vidpipe:task:x", fields).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { reason, .. } if reason.contains("status")));
    }

    #[test]
    fn update_lists_clears_before_sets() {
        let update = TaskUpdate::new()
            .clear_error()
            .clear_speed()
            .progress(100)
            .save_path("/out.mov");
        let (clear, set) = update_to_fields(TaskStatus::Completed, &update);

        assert_eq!(clear, vec!["error_message", "download_speed"]);
        assert_eq!(set[0], ("status", "completed".to_string()));
        assert!(set.contains(&("progress", "100".to_string())));
        assert!(set.contains(&("save_path", "/out.mov".to_string())));
    }

    #[test]
    fn resolved_title_and_category_are_written_together() {
        let update = TaskUpdate::new()
            .title("Episode 1")
            .content_category(ContentCategory::Series);
        let (clear, set) = update_to_fields(TaskStatus::Downloading, &update);

        assert!(clear.is_empty());
        assert!(set.contains(&("title", "Episode 1".to_string())));
        assert!(set.contains(&("content_category", "series".to_string())));
    }
}
