//! Error types shared by the store, the pipeline and the task service.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::task::TaskStatus;

pub type RedisError = deadpool_redis::redis::RedisError;
pub type PoolError = deadpool_redis::PoolError;

/// Failures of the backing store. These are the only errors allowed to
/// reach API callers unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] RedisError),
    #[error("redis pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("cannot create redis pool: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("task {0} not found")]
    NotFound(String),
}

/// Everything that can end a pipeline attempt early.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
    #[error("resolve failed: {0}")]
    ResolveFailed(String),
    #[error("download failed for {url}: {reason}")]
    Download { url: String, reason: String },
    #[error("encoding tool unavailable: {0}")]
    ToolMissing(String),
    #[error("input file does not exist: {}", .0.display())]
    InputMissing(PathBuf),
    #[error("transcode failed: {0}")]
    TranscodeFailed(String),
    #[error("transcode timed out after {}s", .0.as_secs())]
    TranscodeTimeout(Duration),
    #[error("interrupted by a concurrent status change")]
    Cancelled,
    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The tag written in front of a failed task's error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedPlatform,
    ResolveFailed,
    DownloadError,
    ToolMissing,
    InputMissing,
    TranscodeFailed,
    TranscodeTimeout,
    Cancelled,
    IoError,
    StoreError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::UnsupportedPlatform => "UnsupportedPlatform",
            ErrorKind::ResolveFailed => "ResolveFailed",
            ErrorKind::DownloadError => "DownloadError",
            ErrorKind::ToolMissing => "ToolMissing",
            ErrorKind::InputMissing => "InputMissing",
            ErrorKind::TranscodeFailed => "TranscodeFailed",
            ErrorKind::TranscodeTimeout => "TranscodeTimeout",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::IoError => "IoError",
            ErrorKind::StoreError => "StoreError",
        };
        f.write_str(name)
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::UnsupportedPlatform(_) => ErrorKind::UnsupportedPlatform,
            PipelineError::ResolveFailed(_) => ErrorKind::ResolveFailed,
            PipelineError::Download { .. } => ErrorKind::DownloadError,
            PipelineError::ToolMissing(_) => ErrorKind::ToolMissing,
            PipelineError::InputMissing(_) => ErrorKind::InputMissing,
            PipelineError::TranscodeFailed(_) => ErrorKind::TranscodeFailed,
            PipelineError::TranscodeTimeout(_) => ErrorKind::TranscodeTimeout,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::Io { .. } => ErrorKind::IoError,
            PipelineError::Store(_) => ErrorKind::StoreError,
        }
    }

    pub fn download(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        PipelineError::Download {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Message stored on a failed task. The resolved media URL goes on its
    /// own trailing line so operators can debug resolver output.
    pub fn failure_message(&self, resolved_url: Option<&str>) -> String {
        let mut message = format!("[{}] {}", self.kind(), self);
        if let Some(url) = resolved_url {
            message.push_str("\n\nResolved media URL: ");
            message.push_str(url);
        }
        message
    }
}

/// Errors returned by the API-level task operations.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task {0} not found")]
    NotFound(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("cannot move task from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_message_appends_resolved_url_on_trailing_line() {
        let err = PipelineError::download("https://cdn.example.com/v.mp4", "connection reset");
        let message = err.failure_message(Some("https://cdn.example.com/v.mp4"));

        assert!(message.starts_with("[DownloadError] download failed for"));
        assert!(message.ends_with("\n\nResolved media URL: https://cdn.example.com/v.mp4"));
    }

    #[test]
    fn failure_message_without_resolution_has_no_url_line() {
        let err = PipelineError::UnsupportedPlatform("unknown".into());
        assert_eq!(
            err.failure_message(None),
            "[UnsupportedPlatform] unsupported platform: unknown"
        );
    }

    #[test]
    fn timeout_is_tagged() {
        let err = PipelineError::TranscodeTimeout(Duration::from_secs(1800));
        assert_eq!(err.kind(), ErrorKind::TranscodeTimeout);
        assert!(err
            .failure_message(None)
            .starts_with("[TranscodeTimeout] transcode timed out after 1800s"));
    }
}
