//! Clip extraction: turns one run's analysis results into cut clips and a
//! `clips_metadata.json` listing them.
//!
//! Runs are the unit of idempotence. A run whose output directory exists is
//! skipped entirely, and the metadata file is only written once the whole run
//! has been processed, so an interrupted run leaves no metadata behind.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs;

use crate::{
    config::METADATA_FILE,
    error::{ExhibitError, Result},
    log::ProcessLog,
    media::{CLIP_EXTENSION, MediaProbe, TranscodeRequest, Transcoder},
    partition::{DurationCache, PartitionIndex},
    reconcile::{ClipWindow, VideoTiming, reconcile},
    report::{BatchReport, ClipOutcome, RecordOutcome, RunReport, RunStatus, SkipReason},
    timecode::{filename_start_seconds, parse_time, part_info},
    types::{AnalysisRecord, ClipCandidate, ExtractedClip},
};

/// State for one run, threaded through every record and clip.
struct RunContext<'a> {
    run_id: &'a str,
    out_dir: &'a Path,
    log: &'a mut ProcessLog,
    partitions: PartitionIndex,
    clip_counter: u32,
    extracted: Vec<ExtractedClip>,
}

impl RunContext<'_> {
    /// Every examined candidate takes an id, whatever becomes of it.
    fn next_clip_id(&mut self) -> String {
        self.clip_counter += 1;
        format!("clip_{:03}", self.clip_counter)
    }
}

pub struct ClipExtractor<'a, P: ?Sized, T: ?Sized> {
    probe: &'a P,
    transcoder: &'a T,
    video_dir: PathBuf,
    durations: DurationCache,
}

impl<'a, P, T> ClipExtractor<'a, P, T>
where
    P: MediaProbe + ?Sized,
    T: Transcoder + ?Sized,
{
    pub fn new(probe: &'a P, transcoder: &'a T, video_dir: impl Into<PathBuf>) -> Self {
        Self {
            probe,
            transcoder,
            video_dir: video_dir.into(),
            durations: DurationCache::new(),
        }
    }

    /// Process every run directory under `results_root`, in name order, into
    /// a same-named directory under `clips_root`.
    pub async fn process_all(
        &mut self,
        results_root: &Path,
        clips_root: &Path,
        log: &mut ProcessLog,
    ) -> BatchReport {
        let mut batch = BatchReport::default();

        if let Err(e) = fs::create_dir_all(clips_root).await {
            log.record(format!(
                "Cannot create clips root {}: {}",
                clips_root.display(),
                e
            ));
            return batch;
        }

        log.record(format!("Scanning for runs in {}...", results_root.display()));
        let runs = match list_run_dirs(results_root) {
            Ok(runs) => runs,
            Err(e) => {
                log.record(format!(
                    "Cannot read results root {}: {}. Nothing to do.",
                    results_root.display(),
                    e
                ));
                return batch;
            }
        };

        for run_id in runs {
            let out_dir = clips_root.join(&run_id);
            if out_dir.exists() {
                log.record(format!(
                    "Skipping Run: {} (already exists in {})",
                    run_id,
                    clips_root.display()
                ));
                batch.runs.push(RunStatus::AlreadyProcessed { run_id });
                continue;
            }

            log.record(format!("\n>>> Processing Run: {}", run_id));
            let source = results_root.join(&run_id);
            let report = self.process_run(&run_id, &source, &out_dir, log).await;
            batch.runs.push(RunStatus::Processed(report));
        }

        batch
    }

    /// Cut every clip of one run. `source` is a results directory or a single
    /// JSON file. Nothing in here aborts the run; every problem is logged and
    /// recorded in the returned report.
    pub async fn process_run(
        &mut self,
        run_id: &str,
        source: &Path,
        out_dir: &Path,
        log: &mut ProcessLog,
    ) -> RunReport {
        let mut report = RunReport::new(run_id);

        if let Err(e) = fs::create_dir_all(out_dir).await {
            log.record(format!(
                "Cannot create output directory {}: {}",
                out_dir.display(),
                e
            ));
            return report;
        }

        let records = load_records(source, log, &mut report.unreadable).await;
        if records.is_empty() {
            log.record("No data found to process.");
            return report;
        }

        let mut ctx = RunContext {
            run_id,
            out_dir,
            log,
            partitions: PartitionIndex::scan(&self.video_dir),
            clip_counter: 0,
            extracted: Vec::new(),
        };
        ctx.log.record(format!(
            "Starting processing. Found {} source video entries.",
            records.len()
        ));

        for record in &records {
            let outcome = self.process_record(record, &mut ctx).await;
            report.records.push(outcome);
        }

        let metadata_path = out_dir.join(METADATA_FILE);
        match write_metadata(&metadata_path, &ctx.extracted).await {
            Ok(()) => {
                ctx.log.record(format!(
                    "Finished Run {}. Metadata saved to {}",
                    ctx.run_id,
                    metadata_path.display()
                ));
                report.metadata_path = Some(metadata_path);
            }
            Err(e) => ctx.log.record(format!(
                "Failed to write metadata {}: {}",
                metadata_path.display(),
                e
            )),
        }

        report
    }

    async fn process_record(
        &mut self,
        record: &AnalysisRecord,
        ctx: &mut RunContext<'_>,
    ) -> RecordOutcome {
        let source = self.video_dir.join(&record.filename);
        if !source.exists() {
            ctx.log.record(format!(
                "WARNING: Source video not found: {}",
                source.display()
            ));
            return RecordOutcome::Skipped {
                filename: record.filename.clone(),
                reason: SkipReason::SourceMissing(source),
            };
        }

        ctx.log
            .record(format!("Processing videos from: {}", record.filename));

        let duration = self.durations.duration(self.probe, &source).await;
        if duration == 0.0 {
            ctx.log.record("  Failed to get video duration. Skipping.");
            return RecordOutcome::Skipped {
                filename: record.filename.clone(),
                reason: SkipReason::UnknownDuration,
            };
        }

        let mut part_offset = 0.0;
        if let Some((base, part)) = part_info(&record.filename) {
            part_offset = ctx
                .partitions
                .offset_of(&base, part, self.probe, &mut self.durations)
                .await;
            if part_offset > 0.0 {
                ctx.log.record(format!(
                    "  Detected sequence: {}. Part {} starts at +{:.1}s",
                    base, part, part_offset
                ));
            }
        }

        let timing = VideoTiming {
            duration,
            clock_start: filename_start_seconds(&record.filename),
            part_offset,
        };

        let mut clips = Vec::with_capacity(record.clips.len());
        for candidate in &record.clips {
            let outcome = self
                .process_candidate(record, candidate, &source, &timing, ctx)
                .await;
            clips.push(outcome);
        }

        RecordOutcome::Processed {
            filename: record.filename.clone(),
            clips,
        }
    }

    async fn process_candidate(
        &self,
        record: &AnalysisRecord,
        candidate: &ClipCandidate,
        source: &Path,
        timing: &VideoTiming,
        ctx: &mut RunContext<'_>,
    ) -> ClipOutcome {
        let id = ctx.next_clip_id();
        let start = parse_time(&candidate.start_time);
        let end = parse_time(&candidate.end_time);

        let window = match reconcile(timing, start, end) {
            Ok(window) => window,
            Err(reason) => {
                ctx.log.record(format!(
                    "  [{}] {} to {}: {}. Skipping.",
                    id, candidate.start_time, candidate.end_time, reason
                ));
                return ClipOutcome::Rejected { id, reason };
            }
        };
        log_adjustments(ctx.log, candidate, &window, timing);

        let filename = format!("{}.{}", id, CLIP_EXTENSION);
        let output = ctx.out_dir.join(&filename);
        let duration = window.duration();
        ctx.log.record(format!(
            "  [{}] Extracting {:.1}-{:.1} ({:.1}s)...",
            id, window.start, window.end, duration
        ));

        let request = TranscodeRequest::new(source, &output, window.start, duration);
        match self.transcoder.transcode(&request).await {
            Ok(_) => {
                ctx.extracted.push(ExtractedClip::new(
                    id.clone(),
                    filename,
                    record,
                    candidate,
                    duration,
                ));
                ClipOutcome::Extracted { id, window }
            }
            Err(ExhibitError::TranscodeFailed { stderr_tail, .. }) => {
                ctx.log
                    .record(format!("  Error processing clip {}: {}", id, stderr_tail));
                ClipOutcome::TranscodeFailed { id, stderr_tail }
            }
            Err(e) => {
                ctx.log.record(format!("  Exception on clip {}: {}", id, e));
                ClipOutcome::TranscodeFailed {
                    id,
                    stderr_tail: e.to_string(),
                }
            }
        }
    }
}

fn log_adjustments(
    log: &mut ProcessLog,
    candidate: &ClipCandidate,
    window: &ClipWindow,
    timing: &VideoTiming,
) {
    if let Some(osd) = &window.osd {
        log.record(format!(
            "  Adjusting OSD {}: Total sequence diff {:.1}s -> Partition relative {:.1}s",
            candidate.start_time, osd.sequence_offset, osd.relative
        ));
    }
    if let Some(original_end) = window.clamped_from {
        log.record(format!(
            "  End time {:.1} clipped to video length {:.1}.",
            original_end, timing.duration
        ));
    }
}

/// Run directory names under `results_root`, sorted.
fn list_run_dirs(results_root: &Path) -> Result<Vec<String>> {
    let mut runs: Vec<String> = std::fs::read_dir(results_root)?
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    runs.sort();
    Ok(runs)
}

/// Read analysis records from a results directory (every `*.json` in it) or
/// from a single JSON file. Each file holds one record or an array of them.
pub async fn load_records(
    source: &Path,
    log: &mut ProcessLog,
    unreadable: &mut Vec<String>,
) -> Vec<AnalysisRecord> {
    let files = if source.is_dir() {
        log.record(format!("Loading JSONs from directory: {}", source.display()));
        match json_files(source) {
            Ok(files) => files,
            Err(e) => {
                log.record(format!("Error listing {}: {}", source.display(), e));
                return Vec::new();
            }
        }
    } else if source.is_file() {
        log.record(format!("Loading single JSON/File: {}", source.display()));
        vec![source.to_path_buf()]
    } else {
        log.record(format!("Run source not found: {}", source.display()));
        return Vec::new();
    };

    let mut records = Vec::new();
    for file in files {
        let value = match read_json(&file).await {
            Ok(value) => value,
            Err(e) => {
                log.record(format!("Error reading {}: {}", file.display(), e));
                unreadable.push(file.display().to_string());
                continue;
            }
        };

        let entries = match value {
            Value::Array(entries) => entries,
            Value::Object(_) => vec![value],
            _ => {
                log.record(format!(
                    "Error reading {}: expected an object or an array",
                    file.display()
                ));
                unreadable.push(file.display().to_string());
                continue;
            }
        };

        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<AnalysisRecord>(entry) {
                Ok(record) => records.push(record),
                Err(e) => {
                    log.record(format!(
                        "Skipping malformed entry #{} in {}: {}",
                        index,
                        file.display(),
                        e
                    ));
                    unreadable.push(format!("{}#{}", file.display(), index));
                }
            }
        }
    }
    records
}

pub(crate) fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

pub(crate) async fn read_json(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

async fn write_metadata(path: &Path, clips: &[ExtractedClip]) -> Result<()> {
    let pretty_json = serde_json::to_string_pretty(clips)?;
    fs::write(path, &pretty_json).await?;
    Ok(())
}
