use std::ffi::OsStr;
use std::path::Path;

use crate::error::ToolError;
use crate::stages::tools::ToolRunner;

/// Average frame rate of the first video stream.
pub fn probe_frame_rate(ffprobe: &ToolRunner, input: &Path) -> Result<f64, ToolError> {
    let output = ffprobe.run([
        OsStr::new("-v"),
        OsStr::new("error"),
        OsStr::new("-select_streams"),
        OsStr::new("v:0"),
        OsStr::new("-show_entries"),
        OsStr::new("stream=r_frame_rate"),
        OsStr::new("-of"),
        OsStr::new("default=noprint_wrappers=1:nokey=1"),
        input.as_os_str(),
    ])?;

    let raw = output.stdout.lines().next().unwrap_or_default().trim();
    parse_rate(raw).ok_or_else(|| ToolError::Output {
        program: ffprobe.program().to_string(),
        message: format!("unusable frame rate '{}'", raw),
    })
}

/// Number of packets in the first video stream. One packet holds one frame
/// for the encoders we drive, so this counts frames without decoding.
pub fn count_video_frames(ffprobe: &ToolRunner, input: &Path) -> Result<usize, ToolError> {
    let output = ffprobe.run([
        OsStr::new("-v"),
        OsStr::new("error"),
        OsStr::new("-select_streams"),
        OsStr::new("v:0"),
        OsStr::new("-count_packets"),
        OsStr::new("-show_entries"),
        OsStr::new("stream=nb_read_packets"),
        OsStr::new("-of"),
        OsStr::new("csv=p=0"),
        input.as_os_str(),
    ])?;

    let raw = output
        .stdout
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .trim_end_matches(',');
    raw.parse().map_err(|_| ToolError::Output {
        program: ffprobe.program().to_string(),
        message: format!("unusable packet count '{}'", raw),
    })
}

/// Parses `30000/1001` or `25` into frames per second.
pub fn parse_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };

    (rate.is_finite() && rate > 0.0).then_some(rate)
}
