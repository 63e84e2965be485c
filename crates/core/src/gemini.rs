//! Gemini REST client: file uploads and multimodal content generation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    config::GeminiConfig,
    error::{ExhibitError, Result},
};

pub const API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Analysis calls on long videos can take a very long time.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    #[default]
    StateUnspecified,
    Processing,
    Active,
    Failed,
}

/// A file stored on the Gemini side, addressed by its opaque `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub state: FileState,
}

/// Model answer split into the visible text and the thought summaries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedContent {
    pub text: String,
    pub thoughts: Vec<String>,
}

impl GeneratedContent {
    pub fn thinking_process(&self) -> String {
        self.thoughts.join("\n\n")
    }
}

#[async_trait]
pub trait FileService: Send + Sync {
    async fn upload_file(&self, path: &Path, mime_type: &str) -> Result<RemoteFile>;
    async fn get_file(&self, name: &str) -> Result<RemoteFile>;
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, files: &[RemoteFile], prompt: &str) -> Result<GeneratedContent>;
}

#[derive(Debug, Deserialize)]
struct FileEnvelope {
    file: RemoteFile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum RequestPart<'a> {
    FileData {
        #[serde(rename = "mimeType")]
        mime_type: &'a str,
        #[serde(rename = "fileUri")]
        file_uri: &'a str,
    },
    Text(&'a str),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    thinking_config: ThinkingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    include_thoughts: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
pub struct ResponsePart {
    pub text: Option<String>,
    #[serde(default)]
    pub thought: bool,
}

/// Thought parts become the thinking process, every other text part is
/// concatenated into the answer.
pub fn split_parts(parts: Vec<ResponsePart>) -> GeneratedContent {
    let mut content = GeneratedContent::default();
    for part in parts {
        let Some(text) = part.text else { continue };
        if part.thought {
            content.thoughts.push(text);
        } else {
            content.text.push_str(&text);
        }
    }
    content
}

pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    http: Client,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: API_BASE.to_string(),
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn check(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(ExhibitError::ApiStatus { status, body })
    }
}

#[async_trait]
impl FileService for GeminiClient {
    /// Resumable upload: a `start` request returns the session URL, the bytes
    /// then go up in a single `upload, finalize` request.
    async fn upload_file(&self, path: &Path, mime_type: &str) -> Result<RemoteFile> {
        let size = tokio::fs::metadata(path).await?.len();
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let start = self
            .http
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .query(&[("key", &self.api_key)])
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;
        let start = Self::check(start).await?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ExhibitError::UploadFailed {
                path: path.to_path_buf(),
                reason: "no upload URL in response".to_string(),
            })?
            .to_string();

        let file = tokio::fs::File::open(path).await?;
        let response = self
            .http
            .post(upload_url)
            .header("Content-Length", size.to_string())
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(file)
            .send()
            .await?;
        let envelope: FileEnvelope = Self::check(response).await?.json().await?;

        Ok(envelope.file)
    }

    async fn get_file(&self, name: &str) -> Result<RemoteFile> {
        let response = self
            .http
            .get(format!("{}/v1beta/{}", self.base_url, name))
            .query(&[("key", &self.api_key)])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[async_trait]
impl ContentGenerator for GeminiClient {
    async fn generate(&self, files: &[RemoteFile], prompt: &str) -> Result<GeneratedContent> {
        let mut parts: Vec<RequestPart<'_>> = files
            .iter()
            .map(|file| RequestPart::FileData {
                mime_type: file
                    .mime_type
                    .as_deref()
                    .unwrap_or("application/octet-stream"),
                file_uri: &file.uri,
            })
            .collect();
        parts.push(RequestPart::Text(prompt));

        let request = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts,
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                thinking_config: ThinkingConfig {
                    include_thoughts: true,
                },
            },
        };

        info!("Calling {} with {} attached files", self.model, files.len());
        let response = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .query(&[("key", &self.api_key)])
            .json(&request)
            .send()
            .await?;
        let response: GenerateResponse = Self::check(response).await?.json().await?;

        let parts = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .ok_or_else(|| ExhibitError::InvalidResponse {
                reason: "no candidates in Gemini response".to_string(),
            })?;

        Ok(split_parts(parts))
    }
}
