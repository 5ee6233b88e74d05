use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Source site of a URL.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Platform {
    Bilibili,
    Douyin,
    Toutiao,
    Unknown,
}

// Evaluated in order; the first matching rule decides the platform.
static PLATFORM_RULES: LazyLock<Vec<(Platform, Regex)>> = LazyLock::new(|| {
    [
        (Platform::Bilibili, r"b23\.tv/"),
        (Platform::Bilibili, r"bilibili\.com/"),
        (Platform::Douyin, r"v\.douyin\.com/"),
        (Platform::Douyin, r"douyin\.com/"),
        (Platform::Toutiao, r"m\.toutiao\.com/is/"),
        (Platform::Toutiao, r"toutiao\.com/"),
    ]
    .into_iter()
    .map(|(platform, pattern)| (platform, Regex::new(pattern).unwrap()))
    .collect()
});

impl Platform {
    pub fn detect(url: &str) -> Self {
        PLATFORM_RULES
            .iter()
            .find(|(_, re)| re.is_match(url))
            .map(|(platform, _)| *platform)
            .unwrap_or(Platform::Unknown)
    }

    /// Platforms a user can hold credentials for.
    pub fn known() -> [Platform; 3] {
        [Platform::Bilibili, Platform::Douyin, Platform::Toutiao]
    }
}

/// Whether a URL points at a single clip or a collection.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContentCategory {
    #[default]
    ShortVideo,
    Series,
}

impl ContentCategory {
    pub fn detect(url: &str) -> Self {
        if Platform::detect(url) == Platform::Bilibili && url.contains("medialist") {
            ContentCategory::Series
        } else {
            ContentCategory::ShortVideo
        }
    }
}
