/// Format a playback offset as `M:SS`, or `H:MM:SS` once it passes an hour.
///
/// Components are floored, so `59.9` is still `0:59`.
pub fn format_timestamp(seconds: f64) -> String {
    let total = whole_seconds(seconds);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

/// Format an offset as an SRT cue time (`HH:MM:SS,mmm`).
pub fn format_srt_timestamp(seconds: f64) -> String {
    let millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let total = millis / 1000;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        total / 3600,
        (total % 3600) / 60,
        total % 60,
        millis % 1000
    )
}

// NaN.max(0.0) is 0.0, so garbage offsets render as the start of the video.
fn whole_seconds(seconds: f64) -> u64 {
    seconds.max(0.0).floor() as u64
}
