use crate::report::{BatchReport, ClipOutcome, RecordOutcome, RunReport, RunStatus, SkipReason};

/// Format seconds as MM:SS timestamp
pub fn format_timestamp(seconds: f64) -> String {
    let mins = (seconds / 60.0) as u32;
    let secs = (seconds % 60.0) as u32;
    format!("{:02}:{:02}", mins, secs)
}

fn format_run(report: &RunReport) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "## {}\n\n**Extracted:** {} | **Rejected:** {} | **Failed:** {} | **Skipped videos:** {}\n\n",
        report.run_id,
        report.extracted(),
        report.rejected(),
        report.failed(),
        report.skipped_records()
    ));

    for record in &report.records {
        match record {
            RecordOutcome::Processed { filename, clips } => {
                output.push_str(&format!("### {}\n\n", filename));
                for clip in clips {
                    let line = match clip {
                        ClipOutcome::Extracted { id, window } => format!(
                            "✓ {} [{}–{}]",
                            id,
                            format_timestamp(window.start),
                            format_timestamp(window.end)
                        ),
                        ClipOutcome::Rejected { id, reason } => format!("✗ {} {}", id, reason),
                        ClipOutcome::TranscodeFailed { id, .. } => {
                            format!("✗ {} transcode failed", id)
                        }
                    };
                    output.push_str(&format!("• {}\n", line));
                }
                output.push('\n');
            }
            RecordOutcome::Skipped { filename, reason } => {
                let why = match reason {
                    SkipReason::SourceMissing(_) => "source video not found",
                    SkipReason::UnknownDuration => "duration unknown",
                };
                output.push_str(&format!("### {} (skipped: {})\n\n", filename, why));
            }
        }
    }

    for entry in &report.unreadable {
        output.push_str(&format!("• unreadable: {}\n", entry));
    }

    if let Some(path) = &report.metadata_path {
        output.push_str(&format!("\nMetadata: {}\n", path.display()));
    }
    output
}

/// Format a batch report as human-readable markdown
pub fn format_batch_report(batch: &BatchReport) -> String {
    let mut output = String::new();
    output.push_str("# Clip extraction\n\n");

    for run in &batch.runs {
        match run {
            RunStatus::Processed(report) => {
                output.push_str(&format_run(report));
                output.push('\n');
            }
            RunStatus::AlreadyProcessed { run_id } => {
                output.push_str(&format!("## {} (already processed)\n\n", run_id));
            }
        }
    }

    if batch.runs.is_empty() {
        output.push_str("No runs found.\n");
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{ClipWindow, Rejection};

    #[test]
    fn timestamps_are_minutes_and_seconds() {
        assert_eq!(format_timestamp(0.0), "00:00");
        assert_eq!(format_timestamp(150.7), "02:30");
        assert_eq!(format_timestamp(4000.0), "66:40");
    }

    #[test]
    fn batch_report_lists_every_clip() {
        let report = RunReport {
            run_id: "run_20240101_120000".into(),
            records: vec![
                RecordOutcome::Processed {
                    filename: "cam.mp4".into(),
                    clips: vec![
                        ClipOutcome::Extracted {
                            id: "clip_001".into(),
                            window: ClipWindow {
                                start: 10.0,
                                end: 25.0,
                                osd: None,
                                clamped_from: None,
                            },
                        },
                        ClipOutcome::Rejected {
                            id: "clip_002".into(),
                            reason: Rejection::TooShort { duration: 0.5 },
                        },
                    ],
                },
                RecordOutcome::Skipped {
                    filename: "gone.mp4".into(),
                    reason: SkipReason::UnknownDuration,
                },
            ],
            ..RunReport::default()
        };
        let batch = BatchReport {
            runs: vec![
                RunStatus::Processed(report),
                RunStatus::AlreadyProcessed {
                    run_id: "run_old".into(),
                },
            ],
        };

        let text = format_batch_report(&batch);
        assert!(text.contains("**Extracted:** 1 | **Rejected:** 1"));
        assert!(text.contains("✓ clip_001 [00:10–00:25]"));
        assert!(text.contains("✗ clip_002 Clip too short"));
        assert!(text.contains("gone.mp4 (skipped: duration unknown)"));
        assert!(text.contains("run_old (already processed)"));
    }
}
