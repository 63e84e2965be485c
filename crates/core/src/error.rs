use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExhibitError {
    #[error("Duration probe failed for {path}: {reason}")]
    ProbeFailed { path: PathBuf, reason: String },

    #[error("Transcode failed for {output}: {stderr_tail}")]
    TranscodeFailed { output: PathBuf, stderr_tail: String },

    #[error("Upload failed for {path}: {reason}")]
    UploadFailed { path: PathBuf, reason: String },

    #[error("Remote file {name} ended in state {state}")]
    RemoteFileNotActive { name: String, state: String },

    #[error("Timed out after {secs}s waiting for {name} to process")]
    ProcessingTimeout { name: String, secs: u64 },

    #[error("Gemini API returned {status}: {body}")]
    ApiStatus { status: u16, body: String },

    #[error("Invalid API response: {reason}")]
    InvalidResponse { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("Missing API key: {env_var} environment variable is not set")]
    MissingApiKey { env_var: String },
}

pub type Result<T> = std::result::Result<T, ExhibitError>;
