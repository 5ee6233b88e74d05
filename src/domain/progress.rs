//! Progress arithmetic and reporting helpers shared by the fetcher and the
//! transcoder.

use std::time::Duration;

use tokio::time::Instant;

/// Sampling period of the download speed meter.
pub const SPEED_SAMPLE_PERIOD: Duration = Duration::from_secs(1);

/// `floor(done * 100 / total)` clamped to 100. `None` when the total is
/// unknown.
pub fn percent(done: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let pct = (done as u128 * 100 / total as u128).min(100);
    Some(pct as u8)
}

/// Percentage of `duration` covered by `elapsed`, clamped to [0, 100].
/// A zero or non-finite duration yields 0.
pub fn percent_of_duration(elapsed: f64, duration: f64) -> u8 {
    if !(duration.is_finite() && duration > 0.0) || !elapsed.is_finite() {
        return 0;
    }
    (elapsed / duration * 100.0).floor().clamp(0.0, 100.0) as u8
}

/// Human readable rate using 1024-based units.
pub fn format_speed(bytes_per_sec: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if bytes_per_sec < KB {
        format!("{bytes_per_sec:.2} B/s")
    } else if bytes_per_sec < MB {
        format!("{:.2} KB/s", bytes_per_sec / KB)
    } else if bytes_per_sec < GB {
        format!("{:.2} MB/s", bytes_per_sec / MB)
    } else {
        format!("{:.2} GB/s", bytes_per_sec / GB)
    }
}

/// Emits a rate at most once per sampling period: bytes seen since the
/// previous sample divided by the time elapsed since it.
#[derive(Debug)]
pub struct SpeedMeter {
    last_sample: Instant,
    bytes_since: u64,
    period: Duration,
}

impl SpeedMeter {
    pub fn start() -> Self {
        Self::with_period(SPEED_SAMPLE_PERIOD)
    }

    pub fn with_period(period: Duration) -> Self {
        Self {
            last_sample: Instant::now(),
            bytes_since: 0,
            period,
        }
    }

    pub fn record(&mut self, bytes: u64) -> Option<f64> {
        self.record_at(bytes, Instant::now())
    }

    pub fn record_at(&mut self, bytes: u64, now: Instant) -> Option<f64> {
        self.bytes_since += bytes;
        let elapsed = now.saturating_duration_since(self.last_sample);
        if elapsed < self.period {
            return None;
        }
        let rate = self.bytes_since as f64 / elapsed.as_secs_f64();
        self.bytes_since = 0;
        self.last_sample = now;
        Some(rate)
    }
}

/// Lets a percentage through only when it rises above the last one emitted.
#[derive(Debug, Default)]
pub struct ProgressGate {
    last: Option<u8>,
}

impl ProgressGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, pct: u8) -> Option<u8> {
        let pct = pct.min(100);
        match self.last {
            Some(last) if pct <= last => None,
            _ => {
                self.last = Some(pct);
                Some(pct)
            }
        }
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }
}

/// Receives progress from long-running work.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, pct: u8);

    fn on_speed(&self, _speed: &str) {}
}

/// Discards all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _pct: u8) {}
}

/// Maps 0..=100 of a sub-step onto `offset..=offset + span` of the parent.
pub struct Scaled<'a> {
    inner: &'a dyn ProgressObserver,
    offset: f64,
    span: f64,
}

impl<'a> Scaled<'a> {
    pub fn new(inner: &'a dyn ProgressObserver, offset: f64, span: f64) -> Self {
        Self {
            inner,
            offset,
            span,
        }
    }
}

impl ProgressObserver for Scaled<'_> {
    fn on_progress(&self, pct: u8) {
        let scaled = self.offset + self.span * f64::from(pct.min(100)) / 100.0;
        self.inner.on_progress(scaled.floor().clamp(0.0, 100.0) as u8);
    }

    fn on_speed(&self, speed: &str) {
        self.inner.on_speed(speed);
    }
}
