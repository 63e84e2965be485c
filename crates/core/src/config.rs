use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "gemini-3-pro-preview";
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const MODEL_ENV: &str = "GEMINI_MODEL";

pub const METADATA_FILE: &str = "clips_metadata.json";

/// Directory conventions shared by the analysis and clip stages, all rooted
/// at one base directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    base_dir: PathBuf,
}

impl Workspace {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Source videos
    pub fn video_dir(&self) -> PathBuf {
        self.base_dir.join("video")
    }

    /// Supporting documents sent along with every analysis
    pub fn context_dir(&self) -> PathBuf {
        self.base_dir.join("context")
    }

    /// Optional free-text case focus appended to the analysis prompt
    pub fn focus_path(&self) -> PathBuf {
        self.context_dir().join("focus.txt")
    }

    pub fn results_root(&self) -> PathBuf {
        self.base_dir.join("results")
    }

    pub fn run_results_dir(&self, run_id: &str) -> PathBuf {
        self.results_root().join(run_id)
    }

    pub fn clips_root(&self) -> PathBuf {
        self.base_dir.join("dashboard").join("clips")
    }

    pub fn run_clips_dir(&self, run_id: &str) -> PathBuf {
        self.clips_root().join(run_id)
    }

    pub fn process_log_path(&self) -> PathBuf {
        self.base_dir.join("processing.log")
    }

    pub fn upload_cache_path(&self) -> PathBuf {
        self.base_dir.join("upload_cache.json")
    }
}

/// Gemini settings read from the environment.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
}

impl GeminiConfig {
    pub fn from_env() -> crate::Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| crate::ExhibitError::MissingApiKey {
                env_var: API_KEY_ENV.to_string(),
            })?;
        let model = std::env::var(MODEL_ENV).unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Ok(Self { api_key, model })
    }
}
