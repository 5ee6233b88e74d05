//! Parsing of ffmpeg's stderr.

use std::collections::VecDeque;
use std::sync::LazyLock;

use regex::Regex;

static DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration:\s*(\d+:\d{2}:\d{2}(?:\.\d+)?)").unwrap());

/// Parse time string in HH:MM:SS.ms format to seconds.
///
/// ```ignore
/// assert_eq!(parse_time("00:00:10.50"), Some(10.5));
/// assert_eq!(parse_time("N/A"), None);
/// ```
pub fn parse_time(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Elapsed output time of a progress line (`... time=00:01:30.50 ...`).
pub fn parse_time_field(line: &str) -> Option<f64> {
    let time_start = line.find("time=")?;
    let time_str = &line[time_start + 5..];
    let end = time_str.find(' ').unwrap_or(time_str.len());
    parse_time(time_str[..end].trim())
}

/// Input duration from the banner ffmpeg prints for `-i <input>`.
/// `Duration: N/A` and zero durations are treated as unknown.
pub fn parse_duration(output: &str) -> Option<f64> {
    let captures = DURATION.captures(output)?;
    parse_time(&captures[1]).filter(|secs| *secs > 0.0)
}

pub fn is_progress_line(line: &str) -> bool {
    line.contains("time=") && (line.contains("frame=") || line.contains("size="))
}

/// The last few non-progress stderr lines, kept for failure messages.
#[derive(Debug)]
pub struct StderrTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || is_progress_line(line) || self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn render(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("00:00:10.50"), Some(10.5));
        assert_eq!(parse_time("01:30:00.00"), Some(5400.0));
        assert_eq!(parse_time("N/A"), None);
        assert_eq!(parse_time("00:00"), None);
    }

    #[test]
    fn test_parse_time_field() {
        let line = "frame=  100 fps=25 q=28.0 size=    1024kB time=00:00:04.00 bitrate=2097.2kbits/s speed=1.0x";
        assert_eq!(parse_time_field(line), Some(4.0));
        assert_eq!(
            parse_time_field("size=N/A time=N/A bitrate=N/A speed=N/A"),
            None
        );
        assert_eq!(parse_time_field("no progress here"), None);
    }

    #[test]
    fn test_parse_duration() {
        let banner = "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'in.mp4':\n  Duration: 00:02:03.45, start: 0.000000, bitrate: 1205 kb/s\n";
        assert_eq!(parse_duration(banner), Some(123.45));
        assert_eq!(parse_duration("  Duration: N/A, bitrate: N/A"), None);
        assert_eq!(parse_duration("  Duration: 00:00:00.00, start"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn tail_keeps_last_diagnostic_lines_only() {
        let mut tail = StderrTail::new(2);
        tail.push("first");
        tail.push("frame=1 size=1kB time=00:00:01.00");
        tail.push("  ");
        tail.push("second");
        tail.push("third");

        assert_eq!(tail.render(), "second\nthird");
    }
}
