//! Demuxer-level concatenation of same-codec fragments.
//!
//! The ordered fragment list is written to a temporary file on disk and
//! handed to ffmpeg's concat demuxer. The list file is removed when the
//! merge returns, whether it succeeded or not.

use std::io::Write;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::cutter::{run_ffmpeg, ProgressFn};
use crate::tools::ToolConfig;

/// Render the concat demuxer list: one `file '<path>'` line per fragment in
/// the given order. Single quotes are escaped the way the demuxer expects.
pub fn concat_list(fragments: &[PathBuf]) -> String {
    let mut out = String::new();
    for path in fragments {
        let escaped = path.to_string_lossy().replace('\'', r"'\''");
        out.push_str("file '");
        out.push_str(&escaped);
        out.push_str("'\n");
    }
    out
}

/// ffmpeg arguments joining the fragments listed in `list_file`.
pub fn merge_args(list_file: &Path, output: &Path) -> Vec<String> {
    [
        "-hide_banner",
        "-f",
        "concat",
        "-safe",
        "0",
        "-i",
    ]
    .iter()
    .map(|s| s.to_string())
    .chain([list_file.to_string_lossy().to_string()])
    .chain(
        [
            "-map",
            "0",
            "-c",
            "copy",
            "-avoid_negative_ts",
            "make_zero",
            "-movflags",
            "+faststart",
            "-y",
        ]
        .iter()
        .map(|s| s.to_string()),
    )
    .chain([output.to_string_lossy().to_string()])
    .collect()
}

/// Join `fragments` (in order) into `output` without re-encoding.
///
/// `list_dir` receives the temporary list file. `total_duration` (the sum
/// of fragment durations) normalizes progress. Inputs must share codecs;
/// that is not re-validated here.
///
/// # Errors
///
/// An empty `fragments` slice fails immediately without spawning anything.
/// Tool failures surface as [`cs_core::Error::Pipeline`] with step `merge`.
pub async fn merge_fragments(
    ffmpeg: &ToolConfig,
    fragments: &[PathBuf],
    output: &Path,
    list_dir: &Path,
    total_duration: f64,
    on_progress: Option<&ProgressFn>,
    cancel: Option<&CancellationToken>,
) -> cs_core::Result<()> {
    if fragments.is_empty() {
        return Err(cs_core::Error::pipeline("merge", "no fragments to merge"));
    }

    // Dropped at the end of this function on every path, deleting the file.
    let mut list_file = tempfile::Builder::new()
        .prefix("concat-")
        .suffix(".txt")
        .tempfile_in(list_dir)
        .map_err(|e| cs_core::Error::pipeline("merge", format!("cannot create list file: {e}")))?;
    list_file
        .write_all(concat_list(fragments).as_bytes())
        .and_then(|()| list_file.flush())
        .map_err(|e| cs_core::Error::pipeline("merge", format!("cannot write list file: {e}")))?;

    tracing::debug!(
        fragments = fragments.len(),
        output = %output.display(),
        total_duration,
        "Merging fragments"
    );

    run_ffmpeg(
        ffmpeg,
        merge_args(list_file.path(), output),
        total_duration,
        on_progress,
        cancel,
    )
    .await
    .map_err(|e| e.in_step("merge"))
}
