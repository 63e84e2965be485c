//! Parsing of clip timestamps and of the timing hints embedded in camera
//! filenames.

use std::sync::LazyLock;

use regex::Regex;

/// `YYYY-MM-DD_HHMM`, the capture clock body cameras put in their filenames.
static CAPTURE_CLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4}-\d{2}-\d{2})_(\d{2})(\d{2})").expect("capture clock pattern is valid")
});

/// `<base>_Part<N>.mp4`, the naming used when a device splits one recording.
static PART_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?)_Part(\d+)\.mp4$").expect("part suffix pattern is valid")
});

/// Parse an `M:S` or `H:M:S` timestamp into seconds.
///
/// Components may be unpadded or fractional. Anything malformed (wrong number
/// of components, non-numeric or non-finite values) yields `0.0` so that a bad
/// timestamp degrades to "start of file" instead of failing the record.
pub fn parse_time(value: &str) -> f64 {
    let parts: Option<Vec<f64>> = value
        .split(':')
        .map(|part| part.trim().parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect();

    match parts.as_deref() {
        Some([minutes, seconds]) => minutes * 60.0 + seconds,
        Some([hours, minutes, seconds]) => hours * 3600.0 + minutes * 60.0 + seconds,
        _ => 0.0,
    }
}

/// Seconds since midnight of the capture clock embedded in `filename`.
///
/// Only hours and minutes are encoded. `None` means no clock was found, which
/// is distinct from a recording that started at midnight.
pub fn filename_start_seconds(filename: &str) -> Option<f64> {
    let caps = CAPTURE_CLOCK.captures(filename)?;
    let hours: u32 = caps[2].parse().ok()?;
    let minutes: u32 = caps[3].parse().ok()?;
    Some(f64::from(hours * 3600 + minutes * 60))
}

/// Split `<base>_Part<N>.mp4` into `(base, N)`.
pub fn part_info(filename: &str) -> Option<(String, u32)> {
    let caps = PART_SUFFIX.captures(filename)?;
    let part = caps[2].parse().ok()?;
    Some((caps[1].to_string(), part))
}
