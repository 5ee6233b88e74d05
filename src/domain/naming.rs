//! Filesystem-safe titles and the on-disk layout of a task's files.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use md5::{Digest, Md5};
use regex::Regex;

use super::platform::Platform;

const MAX_TITLE_CHARS: usize = 80;
const KEPT_PREFIX_CHARS: usize = MAX_TITLE_CHARS - 15;

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s\-\.#]").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Strips characters outside word/space/`-`/`.`/`#`, turns whitespace runs
/// into `_` and bounds the length. Long titles keep a prefix plus a short
/// content hash so distinct titles stay distinct.
pub fn safe_title(title: &str) -> String {
    let stripped = UNSAFE_CHARS.replace_all(title, "");
    let collapsed = WHITESPACE.replace_all(stripped.trim(), "_").into_owned();

    if collapsed.is_empty() {
        return "untitled".to_string();
    }
    if collapsed.chars().count() <= MAX_TITLE_CHARS {
        return collapsed;
    }

    let digest = hex::encode(Md5::digest(collapsed.as_bytes()));
    let prefix: String = collapsed.chars().take(KEPT_PREFIX_CHARS).collect();
    format!("{prefix}_{}", &digest[..6])
}

/// Paths used while processing one title:
/// `{root}/{platform}/{title}/{title}.{ext}`. When that directory already
/// belongs to another task, [`MediaLayout::with_suffix`] gives the
/// `{title}_{suffix}` variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLayout {
    pub dir: PathBuf,
    stem: String,
}

impl MediaLayout {
    pub fn new(root: &Path, platform: Platform, title: &str) -> Self {
        let stem = safe_title(title);
        Self {
            dir: root.join(platform.as_ref()).join(&stem),
            stem,
        }
    }

    /// Same layout under `{title}_{suffix}`, for both the directory and
    /// the file names.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        let stem = format!("{}_{suffix}", self.stem);
        let dir = match self.dir.parent() {
            Some(parent) => parent.join(&stem),
            None => PathBuf::from(&stem),
        };
        Self { dir, stem }
    }

    /// The downloaded file, removed after a successful transcode.
    pub fn raw(&self) -> PathBuf {
        self.dir.join(format!("{}.mp4", self.stem))
    }

    /// Separate audio track for sources that split streams.
    pub fn audio(&self) -> PathBuf {
        self.dir.join(format!("{}_audio.m4a", self.stem))
    }

    pub fn merged(&self) -> PathBuf {
        self.dir.join(format!("{}_merged.mp4", self.stem))
    }

    /// Final artifact in the canonical container.
    pub fn output(&self, extension: &str) -> PathBuf {
        self.dir.join(format!("{}.{extension}", self.stem))
    }
}
