use crate::playback::session::StreamLength;

/// Label shown for a duration that is not known (yet)
pub const UNKNOWN_DURATION_LABEL: &str = "--:--";

/// Format `seconds` for display next to a track of `total` seconds.
///
/// `M:SS` for tracks under an hour, `H:MM:SS` otherwise. Non-finite values
/// render as `0:00`.
pub fn format_time(seconds: f64, total: f64) -> String {
    if !seconds.is_finite() {
        return "0:00".to_string();
    }

    let whole = seconds.max(0.0).floor() as u64;
    let hours = whole / 3600;
    let minutes = (whole % 3600) / 60;
    let secs = whole % 60;

    let long_form = (total.is_finite() && total >= 3600.0) || hours > 0;
    if long_form {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", whole / 60, secs)
    }
}

/// Duration label, `--:--` until the duration is known
pub fn duration_label(length: StreamLength) -> String {
    match length.seconds() {
        Some(duration) => format_time(duration, duration),
        None => UNKNOWN_DURATION_LABEL.to_string(),
    }
}
