//! Turning the timestamps reported by the analysis stage into a cut window
//! inside one source file.
//!
//! The model is asked for times relative to the start of the file, but it
//! sometimes reads the camera's on-screen clock instead. For a recording the
//! device split into `_PartN` files that clock keeps running across parts, so
//! recovering the position inside one part needs both the capture clock from
//! the filename and the length of every earlier part.

use thiserror::Error;

/// Reported starts must exceed this (besides overrunning the recording)
/// before they are read as on-screen clock values.
pub const OSD_MIN_SECONDS: f64 = 3600.0;

/// Clips this short or shorter are dropped.
pub const MIN_CLIP_SECONDS: f64 = 1.0;

/// What is known about the timing of one source file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoTiming {
    /// Probed length of this file.
    pub duration: f64,
    /// Capture clock from the filename, seconds since midnight.
    pub clock_start: Option<f64>,
    /// Length of the parts recorded before this one.
    pub part_offset: f64,
}

/// Reinterpretation of an on-screen clock timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OsdAdjustment {
    pub reported: f64,
    /// Seconds into the whole multi-part recording.
    pub sequence_offset: f64,
    /// Seconds into this part.
    pub relative: f64,
}

/// An accepted cut, in seconds from the start of the source file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipWindow {
    pub start: f64,
    pub end: f64,
    pub osd: Option<OsdAdjustment>,
    /// Original end when it overran the file and was pulled back.
    pub clamped_from: Option<f64>,
}

impl ClipWindow {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Rejection {
    #[error(
        "Timestamp {reported:.1}s > duration and no capture clock in the filename to reinterpret it"
    )]
    NoCaptureClock { reported: f64 },

    #[error(
        "Timestamp {reported:.1}s (sequence offset {sequence_offset:.1}s) outside partition bounds (relative {relative:.1}s, duration {duration:.1}s)"
    )]
    OutsidePartition {
        reported: f64,
        sequence_offset: f64,
        relative: f64,
        duration: f64,
    },

    #[error("Start time {start:.1}s beyond video length {duration:.1}s")]
    StartBeyondDuration { start: f64, duration: f64 },

    #[error("Clip too short or inverted ({duration:.2}s)")]
    TooShort { duration: f64 },
}

/// Resolve a reported `[start, end]` pair against `timing`.
pub fn reconcile(timing: &VideoTiming, start: f64, end: f64) -> Result<ClipWindow, Rejection> {
    let mut start = start;
    let mut end = end;
    let mut osd = None;

    if start > timing.duration + timing.part_offset && start > OSD_MIN_SECONDS {
        let Some(clock_start) = timing.clock_start else {
            return Err(Rejection::NoCaptureClock { reported: start });
        };

        let sequence_offset = start - clock_start;
        let relative = sequence_offset - timing.part_offset;
        if !(0.0..=timing.duration).contains(&relative) {
            return Err(Rejection::OutsidePartition {
                reported: start,
                sequence_offset,
                relative,
                duration: timing.duration,
            });
        }

        osd = Some(OsdAdjustment {
            reported: start,
            sequence_offset,
            relative,
        });
        end = (end - clock_start) - timing.part_offset;
        start = relative;
    }

    if start >= timing.duration {
        return Err(Rejection::StartBeyondDuration {
            start,
            duration: timing.duration,
        });
    }

    let mut clamped_from = None;
    if end > timing.duration {
        clamped_from = Some(end);
        end = timing.duration;
    }

    let duration = end - start;
    if duration <= MIN_CLIP_SECONDS {
        return Err(Rejection::TooShort { duration });
    }

    Ok(ClipWindow {
        start,
        end,
        osd,
        clamped_from,
    })
}
