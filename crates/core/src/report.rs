use std::path::PathBuf;

use crate::reconcile::{ClipWindow, Rejection};

/// Why a whole analysis record was passed over.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    SourceMissing(PathBuf),
    UnknownDuration,
}

/// What happened to one clip candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum ClipOutcome {
    Extracted { id: String, window: ClipWindow },
    Rejected { id: String, reason: Rejection },
    TranscodeFailed { id: String, stderr_tail: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Processed {
        filename: String,
        clips: Vec<ClipOutcome>,
    },
    Skipped {
        filename: String,
        reason: SkipReason,
    },
}

/// Everything that happened while processing one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub records: Vec<RecordOutcome>,
    /// Files or entries that could not be read as analysis records.
    pub unreadable: Vec<String>,
    pub metadata_path: Option<PathBuf>,
}

impl RunReport {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            ..Self::default()
        }
    }

    fn clips(&self) -> impl Iterator<Item = &ClipOutcome> {
        self.records
            .iter()
            .filter_map(|record| match record {
                RecordOutcome::Processed { clips, .. } => Some(clips),
                RecordOutcome::Skipped { .. } => None,
            })
            .flatten()
    }

    pub fn extracted(&self) -> usize {
        self.clips()
            .filter(|c| matches!(c, ClipOutcome::Extracted { .. }))
            .count()
    }

    pub fn rejected(&self) -> usize {
        self.clips()
            .filter(|c| matches!(c, ClipOutcome::Rejected { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.clips()
            .filter(|c| matches!(c, ClipOutcome::TranscodeFailed { .. }))
            .count()
    }

    pub fn skipped_records(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r, RecordOutcome::Skipped { .. }))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Processed(RunReport),
    /// Output directory already existed; nothing was done.
    AlreadyProcessed { run_id: String },
}

/// Result of one extractor invocation over a results root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub runs: Vec<RunStatus>,
}

impl BatchReport {
    pub fn processed(&self) -> impl Iterator<Item = &RunReport> {
        self.runs.iter().filter_map(|run| match run {
            RunStatus::Processed(report) => Some(report),
            RunStatus::AlreadyProcessed { .. } => None,
        })
    }

    pub fn already_processed(&self) -> usize {
        self.runs
            .iter()
            .filter(|run| matches!(run, RunStatus::AlreadyProcessed { .. }))
            .count()
    }
}
