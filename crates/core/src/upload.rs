//! Cached uploads to the Gemini file store.
//!
//! Uploaded files live on the remote side for a while, so a local JSON cache
//! remembers what was uploaded. An entry is reused only while the local file
//! is unchanged (same path, size and mtime) and the remote copy is `ACTIVE`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::{fs, time::Instant};
use tracing::{error, info, warn};

use crate::{
    error::{ExhibitError, Result},
    gemini::{FileService, FileState, RemoteFile},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedUpload {
    pub name: String,
    pub uri: String,
    pub key: String,
}

#[derive(Debug)]
pub struct UploadCache {
    path: PathBuf,
    entries: BTreeMap<String, CachedUpload>,
}

impl UploadCache {
    /// Load the cache at `path`. A missing or undecodable file gives an empty
    /// cache.
    pub async fn load(path: &Path) -> Self {
        let entries = match fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Could not decode {}, using default: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn get(&self, local: &Path) -> Option<&CachedUpload> {
        self.entries.get(&cache_key(local))
    }

    pub fn insert(&mut self, local: &Path, upload: CachedUpload) {
        self.entries.insert(cache_key(local), upload);
    }

    pub fn remove(&mut self, local: &Path) -> Option<CachedUpload> {
        self.entries.remove(&cache_key(local))
    }

    pub async fn save(&self) -> Result<()> {
        let pretty_json = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.path, pretty_json).await?;
        Ok(())
    }
}

fn cache_key(local: &Path) -> String {
    local.display().to_string()
}

/// `<path>_<size>_<mtime>`: changes whenever the local file does.
pub async fn file_fingerprint(path: &Path) -> Result<String> {
    let metadata = fs::metadata(path).await?;
    let mtime = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    Ok(format!("{}_{}_{}", path.display(), metadata.len(), mtime))
}

pub struct UploadManager<'a, S: ?Sized> {
    service: &'a S,
    cache: UploadCache,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub poll_interval: Duration,
    pub processing_timeout: Duration,
}

impl<'a, S: FileService + ?Sized> UploadManager<'a, S> {
    pub fn new(service: &'a S, cache: UploadCache) -> Self {
        Self {
            service,
            cache,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            processing_timeout: Duration::from_secs(600),
        }
    }

    #[cfg(test)]
    fn cache(&self) -> &UploadCache {
        &self.cache
    }

    /// Drop the cache entry so the next `upload_cached` uploads again.
    pub async fn forget(&mut self, path: &Path) -> Result<bool> {
        let removed = self.cache.remove(path).is_some();
        if removed {
            self.cache.save().await?;
        }
        Ok(removed)
    }

    /// Return an active remote copy of `path`, uploading it if the cache
    /// can't vouch for one. Failures are logged and give `None`.
    pub async fn upload_cached(&mut self, path: &Path, mime_type: &str) -> Option<RemoteFile> {
        let fingerprint = match file_fingerprint(path).await {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                error!("Cannot read {}: {}", path.display(), e);
                return None;
            }
        };

        if let Some(cached) = self.cache.get(path)
            && cached.key == fingerprint
        {
            info!("Checking cached file {} ({})...", path.display(), cached.name);
            match self.service.get_file(&cached.name).await {
                Ok(remote) if remote.state == FileState::Active => {
                    info!("File {} already active on server.", path.display());
                    return Some(remote);
                }
                _ => info!(
                    "Cached file {} not found or not active. Re-uploading.",
                    cached.name
                ),
            }
        }

        info!("Uploading {}...", path.display());
        for attempt in 1..=self.max_attempts {
            match self.upload_and_wait(path, mime_type).await {
                Ok(remote) => {
                    self.cache.insert(
                        path,
                        CachedUpload {
                            name: remote.name.clone(),
                            uri: remote.uri.clone(),
                            key: fingerprint,
                        },
                    );
                    if let Err(e) = self.cache.save().await {
                        warn!("Failed to save upload cache: {}", e);
                    }
                    return Some(remote);
                }
                Err(
                    e @ (ExhibitError::ProcessingTimeout { .. }
                    | ExhibitError::RemoteFileNotActive { .. }),
                ) => {
                    error!("File {} failed to process: {}", path.display(), e);
                    return None;
                }
                Err(e) => {
                    error!(
                        "Upload attempt {}/{} failed for {}: {}",
                        attempt,
                        self.max_attempts,
                        path.display(),
                        e
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
            }
        }
        None
    }

    async fn upload_and_wait(&self, path: &Path, mime_type: &str) -> Result<RemoteFile> {
        let mut remote = self.service.upload_file(path, mime_type).await?;
        info!("Uploaded {} as {}", path.display(), remote.name);

        let started = Instant::now();
        while remote.state == FileState::Processing {
            if started.elapsed() > self.processing_timeout {
                return Err(ExhibitError::ProcessingTimeout {
                    name: remote.name,
                    secs: self.processing_timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
            remote = self.service.get_file(&remote.name).await?;
        }

        if remote.state != FileState::Active {
            return Err(ExhibitError::RemoteFileNotActive {
                state: format!("{:?}", remote.state),
                name: remote.name,
            });
        }
        Ok(remote)
    }
}
