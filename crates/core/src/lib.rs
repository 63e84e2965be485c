pub mod analysis;
pub mod config;
pub mod error;
pub mod extract;
pub mod format;
pub mod gemini;
pub mod log;
pub mod media;
pub mod partition;
pub mod reconcile;
pub mod report;
pub mod timecode;
pub mod types;
pub mod upload;

pub use analysis::{RunManager, analyze_video};
pub use config::{GeminiConfig, Workspace};
pub use error::{ExhibitError, Result};
pub use extract::ClipExtractor;
pub use format::{format_batch_report, format_timestamp};
pub use gemini::{ContentGenerator, FileService, GeminiClient, RemoteFile};
pub use log::ProcessLog;
pub use media::{Ffmpeg, Ffprobe, MediaProbe, Transcoder};
pub use reconcile::{ClipWindow, Rejection, VideoTiming, reconcile};
pub use report::{BatchReport, RunReport, RunStatus};
pub use types::{AnalysisRecord, ClipCandidate, ExtractedClip};
pub use upload::{UploadCache, UploadManager};
