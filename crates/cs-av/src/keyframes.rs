//! Keyframe alignment heuristic.
//!
//! A cut can be done by pure stream copy only when both boundaries sit on
//! (or within a small tolerance of) a keyframe of the primary video stream.
//! Probing is best-effort: any failure reports "not lossless" so the caller
//! can still take the re-encoding path.

use std::path::Path;
use std::time::Duration;

use crate::tools::ToolConfig;

const KEYFRAME_PROBE_TIMEOUT: Duration = Duration::from_secs(600);

/// ffprobe arguments listing packet times and flags of the first video
/// stream as `pts_time,flags` CSV rows.
pub fn keyframe_probe_args(file: &Path) -> Vec<String> {
    vec![
        "-v".into(),
        "error".into(),
        "-select_streams".into(),
        "v:0".into(),
        "-show_entries".into(),
        "packet=pts_time,flags".into(),
        "-of".into(),
        "csv=p=0".into(),
        file.to_string_lossy().to_string(),
    ]
}

/// Extract sorted keyframe timestamps from `pts_time,flags` rows. Rows whose
/// flags do not start with `K` or whose time is not a number are skipped.
pub fn parse_keyframe_csv(text: &str) -> Vec<f64> {
    let mut times: Vec<f64> = text
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim().split(',');
            let time = fields.next()?.trim().parse::<f64>().ok()?;
            let flags = fields.next()?.trim();
            (flags.starts_with('K') && time.is_finite()).then_some(time)
        })
        .collect();
    times.sort_by(f64::total_cmp);
    times.dedup();
    times
}

/// Whether some keyframe lies within `tolerance` seconds of `t`.
pub fn is_aligned(keyframes: &[f64], t: f64, tolerance: f64) -> bool {
    // Keyframes are sorted; only the neighbours of the insertion point matter.
    let idx = keyframes.partition_point(|&k| k < t);
    let near = |i: usize| keyframes.get(i).is_some_and(|&k| (k - t).abs() <= tolerance + 1e-9);
    near(idx) || (idx > 0 && near(idx - 1))
}

/// Lossless is feasible only if both boundaries are keyframe-aligned.
pub fn is_lossless_feasible(keyframes: &[f64], start: f64, end: f64, tolerance: f64) -> bool {
    is_aligned(keyframes, start, tolerance) && is_aligned(keyframes, end, tolerance)
}

/// List keyframe timestamps of `file`'s primary video stream.
pub async fn keyframe_times(ffprobe: &ToolConfig, file: &Path) -> cs_core::Result<Vec<f64>> {
    let output = ffprobe
        .command_within(KEYFRAME_PROBE_TIMEOUT)
        .args(keyframe_probe_args(file))
        .execute()
        .await?;
    let keyframes = parse_keyframe_csv(&output.stdout);
    if keyframes.is_empty() {
        return Err(cs_core::Error::Probe(format!(
            "no keyframes found in {}",
            file.display()
        )));
    }
    Ok(keyframes)
}

/// Advisory check: can `[start, end)` of `file` be cut by stream copy?
///
/// Fails closed: probe errors are logged and reported as `false`, so the
/// caller re-encodes.
pub async fn can_cut_losslessly(
    ffprobe: &ToolConfig,
    file: &Path,
    start: f64,
    end: f64,
    tolerance: f64,
) -> bool {
    match keyframe_times(ffprobe, file).await {
        Ok(keyframes) => {
            let feasible = is_lossless_feasible(&keyframes, start, end, tolerance);
            tracing::debug!(
                file = %file.display(),
                start,
                end,
                keyframes = keyframes.len(),
                feasible,
                "Keyframe alignment checked"
            );
            feasible
        }
        Err(e) => {
            tracing::warn!(
                file = %file.display(),
                "Keyframe probe failed, assuming re-encode is needed: {e}"
            );
            false
        }
    }
}
