//! Progress and error extraction from ffmpeg diagnostic text.
//!
//! Everything here is pure: a line either yields a fraction or it yields
//! nothing. Malformed input is never an error.

use std::sync::LazyLock;

use regex::Regex;

/// Message used when a failed process printed nothing at all.
pub const UNKNOWN_ERROR: &str = "unknown error";

/// Stats line of a video encode/copy:
/// `frame=  120 fps= 30 q=-1.0 size=    1024kB time=00:00:04.00 bitrate=...`
static VIDEO_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"frame=\s*\S+\s+fps=\s*\S+\s+q=\s*\S+\s+(?:L?size)=\s*\S+\s+time=\s*(\S+)")
        .expect("video progress pattern is a valid regex")
});

/// Stats line of an audio-only run: `size=     512kB time=00:00:10.24 ...`
static AUDIO_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:L?size)=\s*\S+\s+time=\s*(\S+)")
        .expect("audio progress pattern is a valid regex")
});

static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(-?)(\d{2}):(\d{2}):(\d{2})\.(\d{2})$")
        .expect("timestamp pattern is a valid regex")
});

const FAILURE_WORDS: &[&str] = &["error", "invalid", "failed", "no such"];

/// Parse `[-]HH:MM:SS.CC` into seconds. A leading `-` negates the value.
pub fn parse_timestamp(s: &str) -> Option<f64> {
    let caps = TIMESTAMP.captures(s.trim())?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let hours = field(2)?;
    let minutes = field(3)?;
    let seconds = field(4)?;
    let centis = field(5)?;
    if minutes >= 60 || seconds >= 60 {
        return None;
    }

    let value = f64::from(hours) * 3600.0
        + f64::from(minutes) * 60.0
        + f64::from(seconds)
        + f64::from(centis) / 100.0;

    if caps.get(1).is_some_and(|m| !m.as_str().is_empty()) {
        Some(-value)
    } else {
        Some(value)
    }
}

/// Format seconds as `[-]HH:MM:SS.CC`, rounding to the nearest centisecond.
pub fn format_timestamp(secs: f64) -> String {
    let sign = if secs < 0.0 { "-" } else { "" };
    let total_centis = (secs.abs() * 100.0).round() as u64;
    let centis = total_centis % 100;
    let total_secs = total_centis / 100;
    format!(
        "{sign}{:02}:{:02}:{:02}.{:02}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60,
        centis
    )
}

/// Extract the elapsed time carried by a stats line, if the line has one of
/// the two recognized shapes.
pub fn elapsed_in_line(line: &str) -> Option<f64> {
    let caps = VIDEO_LINE
        .captures(line)
        .or_else(|| AUDIO_LINE.captures(line))?;
    parse_timestamp(caps.get(1)?.as_str())
}

/// Convert one diagnostic line into a fraction of `total_duration`.
///
/// Returns `None` when the line carries no progress, when its time is
/// malformed or negative (encoders emit brief negative times near stream
/// start), or when `total_duration <= 0`. Results are capped at `1.0`.
pub fn parse_progress_line(line: &str, total_duration: f64) -> Option<f64> {
    if total_duration.is_nan() || total_duration <= 0.0 {
        return None;
    }
    let elapsed = elapsed_in_line(line)?;
    if elapsed < 0.0 {
        return None;
    }
    Some((elapsed / total_duration).min(1.0))
}

/// Pick the most useful human-readable line out of a failed run's output.
///
/// Scans backward for the last line mentioning a failure word, falls back to
/// the last non-empty line, and finally to [`UNKNOWN_ERROR`].
pub fn extract_error(text: &str) -> String {
    let mut last_non_empty = None;

    for line in text.lines().rev().map(str::trim).filter(|l| !l.is_empty()) {
        if last_non_empty.is_none() {
            last_non_empty = Some(line);
        }
        let lower = line.to_ascii_lowercase();
        if FAILURE_WORDS.iter().any(|w| lower.contains(w)) {
            return line.to_string();
        }
    }

    last_non_empty
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_ERROR.to_string())
}

/// Stateful wrapper binding a total duration to [`parse_progress_line`] and
/// suppressing regressions, so callers only ever see rising values.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_duration: f64,
    last: f64,
}

impl ProgressTracker {
    pub fn new(total_duration: f64) -> Self {
        Self {
            total_duration,
            last: 0.0,
        }
    }

    /// Feed a line; returns a new fraction only when it moved forward.
    pub fn observe(&mut self, line: &str) -> Option<f64> {
        let fraction = parse_progress_line(line, self.total_duration)?;
        if fraction > self.last {
            self.last = fraction;
            Some(fraction)
        } else {
            None
        }
    }
}
