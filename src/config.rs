//! Environment configuration.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::adapters::local::fetcher::FetchConfig;
use crate::application::worker::WorkerConfig;
use crate::domain::av::TranscoderConfig;

const SECS_PER_DAY: u64 = 24 * 60 * 60;
const MAX_COOKIE_TTL_DAYS: u64 = 10 * 365;

/// Which backing store holds tasks, the queue and credentials.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Redis,
    /// In-process store; everything is lost on exit.
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreKind::Redis),
            "memory" => Ok(StoreKind::Memory),
            other => Err(format!("unknown store {other:?}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    /// Redis connection URL
    pub redis_url: String,
    pub store: StoreKind,
    /// Default root for downloaded and transcoded files
    pub storage_root: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub download_timeout: Duration,
    pub transcode_timeout: Duration,
    /// Duration assumed when ffmpeg cannot report one
    pub fallback_duration: Duration,
    /// Number of worker loops draining the queue
    pub workers: usize,
    pub keep_raw_on_transcode_failure: bool,
    pub cookie_ttl: Duration,
    pub queue_poll: Duration,
    /// Accept links that already point at a media file
    pub allow_direct_urls: bool,
}

impl Config {
    /// Load `.env`, then read the process environment.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let secs = |key: &str, default: u64| Duration::from_secs(parsed(&lookup, key, default));

        Self {
            addr: text("ADDR", "127.0.0.1"),
            port: text("PORT", "3000"),
            redis_url: text("REDIS_URL", "redis://127.0.0.1/"),
            store: parsed(&lookup, "STORE", StoreKind::Redis),
            storage_root: lookup("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| default_storage_root(&lookup)),
            ffmpeg_path: PathBuf::from(text("FFMPEG_PATH", "ffmpeg")),
            download_timeout: secs("DOWNLOAD_TIMEOUT_SECS", 600),
            transcode_timeout: secs("TRANSCODE_TIMEOUT_SECS", 1800),
            fallback_duration: secs("FALLBACK_DURATION_SECS", 3600),
            workers: parsed(&lookup, "WORKERS", 1usize).max(1),
            keep_raw_on_transcode_failure: parsed(&lookup, "KEEP_RAW_ON_TRANSCODE_FAILURE", true),
            cookie_ttl: cookie_ttl(parsed(&lookup, "COOKIE_TTL_DAYS", 30u64)),
            queue_poll: secs("QUEUE_POLL_SECS", 5),
            allow_direct_urls: parsed(&lookup, "ALLOW_DIRECT_URLS", false),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }

    pub fn fetch(&self) -> FetchConfig {
        FetchConfig {
            timeout: self.download_timeout,
            ..FetchConfig::default()
        }
    }

    pub fn transcoder(&self) -> TranscoderConfig {
        TranscoderConfig {
            ffmpeg_path: self.ffmpeg_path.clone(),
            timeout: self.transcode_timeout,
            fallback_duration: self.fallback_duration,
        }
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: self.queue_poll,
            keep_raw_on_transcode_failure: self.keep_raw_on_transcode_failure,
            ..WorkerConfig::default()
        }
    }
}

/// Credential lifetime in days, capped at `MAX_COOKIE_TTL_DAYS`.
fn cookie_ttl(days: u64) -> Duration {
    if days > MAX_COOKIE_TTL_DAYS {
        warn!(days, max = MAX_COOKIE_TTL_DAYS, "COOKIE_TTL_DAYS too large, capping");
    }
    Duration::from_secs(days.min(MAX_COOKIE_TTL_DAYS) * SECS_PER_DAY)
}

fn default_storage_root(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Downloads")
        .join("Videos")
}

/// Parses `key`, falling back to `default` when unset or invalid.
fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "invalid configuration value, using default");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[("HOME", "/home/ana")]);

        assert_eq!(config.bind_addr(), "127.0.0.1:3000");
        assert_eq!(config.store, StoreKind::Redis);
        assert_eq!(config.storage_root, PathBuf::from("/home/ana/Downloads/Videos"));
        assert_eq!(config.download_timeout, Duration::from_secs(600));
        assert_eq!(config.transcode_timeout, Duration::from_secs(1800));
        assert_eq!(config.fallback_duration, Duration::from_secs(3600));
        assert_eq!(config.workers, 1);
        assert!(config.keep_raw_on_transcode_failure);
        assert_eq!(config.cookie_ttl, Duration::from_secs(30 * 86_400));
        assert!(!config.allow_direct_urls);
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            ("STORE", "Memory"),
            ("STORAGE_ROOT", "/srv/videos"),
            ("WORKERS", "3"),
            ("KEEP_RAW_ON_TRANSCODE_FAILURE", "false"),
            ("TRANSCODE_TIMEOUT_SECS", "60"),
            ("ALLOW_DIRECT_URLS", "true"),
        ]);

        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.storage_root, PathBuf::from("/srv/videos"));
        assert_eq!(config.workers, 3);
        assert!(!config.worker().keep_raw_on_transcode_failure);
        assert_eq!(config.transcoder().timeout, Duration::from_secs(60));
        assert!(config.allow_direct_urls);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = config(&[
            ("WORKERS", "many"),
            ("DOWNLOAD_TIMEOUT_SECS", "-5"),
            ("STORE", "postgres"),
        ]);

        assert_eq!(config.workers, 1);
        assert_eq!(config.fetch().timeout, Duration::from_secs(600));
        assert_eq!(config.store, StoreKind::Redis);
    }

    #[test]
    fn huge_cookie_ttl_is_capped() {
        let huge = config(&[("COOKIE_TTL_DAYS", "18446744073709551615")]);
        assert_eq!(
            huge.cookie_ttl,
            Duration::from_secs(MAX_COOKIE_TTL_DAYS * SECS_PER_DAY)
        );
        let week = config(&[("COOKIE_TTL_DAYS", "7")]);
        assert_eq!(week.cookie_ttl, Duration::from_secs(7 * 86_400));
    }

    #[test]
    fn zero_workers_means_one() {
        assert_eq!(config(&[("WORKERS", "0")]).workers, 1);
    }
}
