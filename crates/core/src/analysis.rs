//! Analysis stage: one model call per source video, results kept per run.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs;
use tracing::{error, info};

use crate::{
    config::Workspace,
    error::Result,
    extract::{json_files, read_json},
    gemini::{ContentGenerator, GeneratedContent, RemoteFile},
    types::AnalysisRecord,
};

pub const VIDEO_MIME: &str = "video/mp4";
pub const PDF_MIME: &str = "application/pdf";

/// Run id derived from the local clock, e.g. `run_20240101_120000`.
pub fn new_run_id() -> String {
    chrono::Local::now().format("run_%Y%m%d_%H%M%S").to_string()
}

/// Tracks the results directory of one analysis run. Re-opening a run with
/// the same id resumes it.
#[derive(Debug, Clone)]
pub struct RunManager {
    run_id: String,
    results_dir: PathBuf,
}

impl RunManager {
    pub async fn open(workspace: &Workspace, run_id: Option<String>) -> Result<Self> {
        let run_id = run_id.unwrap_or_else(new_run_id);
        let results_dir = workspace.run_results_dir(&run_id);
        fs::create_dir_all(&results_dir).await?;
        info!(
            "Run manager initialized. Run ID: {}. Results dir: {}",
            run_id,
            results_dir.display()
        );
        Ok(Self {
            run_id,
            results_dir,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub fn result_path(&self, filename: &str) -> PathBuf {
        self.results_dir.join(format!("{}.json", filename))
    }

    async fn stored_results(&self) -> Vec<Value> {
        let Ok(files) = json_files(&self.results_dir) else {
            return Vec::new();
        };
        let mut results = Vec::new();
        for file in files {
            if let Ok(value) = read_json(&file).await {
                results.push(value);
            }
        }
        results
    }

    /// Filenames that already have a result in this run.
    pub async fn processed_files(&self) -> BTreeSet<String> {
        self.stored_results()
            .await
            .iter()
            .filter_map(|value| value.get("filename")?.as_str().map(str::to_string))
            .collect()
    }

    /// Insights from earlier videos of this run, one prompt line each.
    pub async fn previous_insights(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for value in self.stored_results().await {
            let Some(insights) = value.get("insights").and_then(Value::as_array) else {
                continue;
            };
            let filename = value
                .get("filename")
                .and_then(Value::as_str)
                .unwrap_or("Unknown");
            for insight in insights {
                let text = match insight {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                lines.push(format!("- From {}: {}", filename, text));
            }
        }
        lines
    }

    pub async fn save_result(&self, record: &AnalysisRecord) -> Result<PathBuf> {
        let path = self.result_path(&record.filename);
        let pretty_json = serde_json::to_string_pretty(record)?;
        fs::write(&path, pretty_json).await?;
        Ok(path)
    }
}

/// Case focus from `context/focus.txt`, if present and non-empty.
pub async fn load_focus(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).await.ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// All `*.mp4` files under `dir`, recursively, sorted.
pub fn list_videos(dir: &Path) -> Vec<PathBuf> {
    let mut videos = Vec::new();
    collect_with_extension(dir, "mp4", true, &mut videos);
    videos.sort();
    videos
}

/// `*.pdf` files directly inside `dir`, sorted.
pub fn list_documents(dir: &Path) -> Vec<PathBuf> {
    let mut documents = Vec::new();
    collect_with_extension(dir, "pdf", false, &mut documents);
    documents.sort();
    documents
}

fn collect_with_extension(dir: &Path, extension: &str, recursive: bool, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                collect_with_extension(&path, extension, recursive, out);
            }
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
        {
            out.push(path);
        }
    }
}

pub fn build_prompt(filename: &str, previous_insights: &[String], focus: Option<&str>) -> String {
    let insights = if previous_insights.is_empty() {
        String::new()
    } else {
        format!(
            "\n**INSIGHTS GATHERED FROM PREVIOUS VIDEOS IN THIS RUN:**\n{}\n",
            previous_insights.join("\n")
        )
    };
    let focus = focus
        .map(|text| format!("\n**CASE FOCUS:**\n{}\n", text))
        .unwrap_or_default();

    format!(
        r#"You are an expert legal analyst and video forensic investigator working for the defense.

Your task is to deeply analyze the provided video footage ({filename}) in the context of the attached legal documents.
{insights}{focus}
**TIMESTAMPS AND CHRONOLOGY - CRITICAL:**
1. **FILE TIME ONLY:** All `start_time` and `end_time` values MUST use the time elapsed from the beginning of THIS video file (00:00).
2. **IGNORE BURNT-IN TIMESTAMPS:** Do NOT use the date/time text shown on screen. It does not correspond to the video player position.
3. **CHRONOLOGICAL ORDER:** List all clips in strictly chronological order of file time.

**General Defense Priorities:**
1. Exculpatory evidence or contradictions to the prosecution's narrative.
2. Moments that display the defendant's disability, vulnerability, physical limitations, or confusion.
3. Emotionally resonant moments that humanize the defendant.
4. Procedural errors, aggression, unprofessional conduct, or lack of accommodation by law enforcement.
5. Audio that appears to be muted or cut off during sensitive conversations.

Output the FINAL analysis as raw JSON (no markdown fences) in this format:
{{
  "filename": "{filename}",
  "summary": "Brief summary of the video content",
  "clips": [
    {{
      "start_time": "MM:SS",
      "end_time": "MM:SS",
      "description": "Detailed description of what happens in this clip",
      "transcript": "Verbatim transcript of any dialogue (if audible)",
      "significance": "How this helps the defense. Connect to specific context documents where possible."
    }}
  ],
  "insights": [
    "Key insight 1",
    "Key insight 2"
  ]
}}
"#
    )
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Turn the model answer into a record. Any JSON object is kept, whatever
/// its field types; only an answer that isn't a JSON object at all becomes a
/// parse-error record holding the raw text.
pub fn parse_analysis(filename: &str, content: GeneratedContent) -> AnalysisRecord {
    let thinking = content.thinking_process();
    let parsed = match serde_json::from_str::<Value>(strip_code_fence(&content.text)) {
        Ok(Value::Object(mut fields)) => {
            fields.insert("filename".to_string(), Value::String(filename.to_string()));
            serde_json::from_value::<AnalysisRecord>(Value::Object(fields))
                .map_err(|e| e.to_string())
        }
        Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
        Err(e) => Err(e.to_string()),
    };

    match parsed {
        Ok(mut record) => {
            record.thinking_process = Some(thinking);
            record
        }
        Err(reason) => {
            let preview: String = content.text.chars().take(200).collect();
            error!(
                "Failed to parse JSON from {} ({}). Raw text: {}...",
                filename, reason, preview
            );
            AnalysisRecord::parse_error(filename, content.text, thinking)
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Analyze one uploaded video together with the context documents.
pub async fn analyze_video<G: ContentGenerator + ?Sized>(
    generator: &G,
    video: &RemoteFile,
    context: &[RemoteFile],
    filename: &str,
    run: &RunManager,
    focus: Option<&str>,
) -> Result<AnalysisRecord> {
    let insights = run.previous_insights().await;
    info!(
        "Analyzing {}. Included {} prior insights.",
        filename,
        insights.len()
    );
    let prompt = build_prompt(filename, &insights, focus);

    let mut files = Vec::with_capacity(context.len() + 1);
    files.push(video.clone());
    files.extend_from_slice(context);

    let content = generator.generate(&files, &prompt).await?;
    Ok(parse_analysis(filename, content))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::gemini::FileState;

    struct CannedGenerator {
        answer: GeneratedContent,
        prompts: Mutex<Vec<String>>,
        file_counts: Mutex<Vec<usize>>,
    }

    impl CannedGenerator {
        fn new(text: &str) -> Self {
            Self {
                answer: GeneratedContent {
                    text: text.to_string(),
                    thoughts: vec!["first".into(), "second".into()],
                },
                prompts: Mutex::new(Vec::new()),
                file_counts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ContentGenerator for CannedGenerator {
        async fn generate(&self, files: &[RemoteFile], prompt: &str) -> Result<GeneratedContent> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.file_counts.lock().unwrap().push(files.len());
            Ok(self.answer.clone())
        }
    }

    fn remote(name: &str) -> RemoteFile {
        RemoteFile {
            name: name.into(),
            uri: format!("https://files.example/{}", name),
            mime_type: Some(VIDEO_MIME.into()),
            state: FileState::Active,
        }
    }

    #[test]
    fn run_ids_follow_timestamp_pattern() {
        let id = new_run_id();
        assert!(id.starts_with("run_"));
        assert_eq!(id.len(), "run_20240101_120000".len());
        assert_eq!(&id[12..13], "_");
    }

    #[tokio::test]
    async fn resumed_run_reports_processed_files_and_insights() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let run = RunManager::open(&ws, Some("run_a".into())).await.unwrap();
        assert!(run.results_dir().is_dir());

        std::fs::write(
            run.result_path("cam1.mp4"),
            json!({"filename": "cam1.mp4", "insights": ["Door was open"]}).to_string(),
        )
        .unwrap();
        std::fs::write(
            run.result_path("cam2.mp4"),
            json!({"filename": "cam2.mp4", "error": "JSON Parse Error"}).to_string(),
        )
        .unwrap();
        std::fs::write(run.results_dir().join("junk.json"), "{{").unwrap();

        let processed = run.processed_files().await;
        assert!(processed.contains("cam1.mp4"));
        assert!(processed.contains("cam2.mp4"));
        assert_eq!(processed.len(), 2);
        assert_eq!(
            run.previous_insights().await,
            vec!["- From cam1.mp4: Door was open".to_string()]
        );
    }

    #[test]
    fn prompt_carries_insights_and_focus() {
        let prompt = build_prompt(
            "cam.mp4",
            &["- From a.mp4: something".to_string()],
            Some("Look for the walker."),
        );
        assert!(prompt.contains("(cam.mp4)"));
        assert!(prompt.contains("PREVIOUS VIDEOS IN THIS RUN"));
        assert!(prompt.contains("- From a.mp4: something"));
        assert!(prompt.contains("Look for the walker."));
        assert!(prompt.contains("\"filename\": \"cam.mp4\""));

        let bare = build_prompt("cam.mp4", &[], None);
        assert!(!bare.contains("PREVIOUS VIDEOS"));
        assert!(!bare.contains("CASE FOCUS"));
    }

    #[test]
    fn fenced_json_is_accepted() {
        let content = GeneratedContent {
            text: "```json\n{\"summary\": \"s\", \"clips\": [{\"start_time\": \"0:10\", \"end_time\": \"0:20\"}]}\n```".into(),
            thoughts: vec![],
        };
        let record = parse_analysis("cam.mp4", content);
        assert_eq!(record.filename, "cam.mp4");
        assert_eq!(record.clips.len(), 1);
        assert!(record.error.is_none());
    }

    #[test]
    fn non_json_answer_becomes_error_record() {
        let content = GeneratedContent {
            text: "I could not watch the video".into(),
            thoughts: vec!["hmm".into()],
        };
        let record = parse_analysis("cam.mp4", content);
        assert_eq!(record.error.as_deref(), Some("JSON Parse Error"));
        assert_eq!(record.raw_text.as_deref(), Some("I could not watch the video"));
        assert_eq!(record.thinking_process.as_deref(), Some("hmm"));
        assert!(record.clips.is_empty());
    }

    #[test]
    fn valid_json_with_unexpected_types_is_kept() {
        let content = GeneratedContent {
            text: r#"{"summary": "s", "clips": [{"start_time": "0:10", "end_time": "0:30"}], "insights": [{"point": "x"}]}"#.into(),
            thoughts: vec![],
        };
        let record = parse_analysis("cam.mp4", content);
        assert!(record.error.is_none());
        assert_eq!(record.clips.len(), 1);
        assert_eq!(record.insights, vec![json!({"point": "x"})]);
    }

    #[test]
    fn json_that_is_not_an_object_becomes_error_record() {
        let content = GeneratedContent {
            text: "[1, 2]".into(),
            thoughts: vec![],
        };
        let record = parse_analysis("cam.mp4", content);
        assert_eq!(record.error.as_deref(), Some("JSON Parse Error"));
        assert_eq!(record.raw_text.as_deref(), Some("[1, 2]"));
    }

    #[tokio::test]
    async fn object_insights_are_carried_into_later_prompts() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let run = RunManager::open(&ws, Some("run_c".into())).await.unwrap();
        let content = GeneratedContent {
            text: r#"{"insights": [{"point": "x"}, "Door was open"]}"#.into(),
            thoughts: vec![],
        };
        run.save_result(&parse_analysis("cam.mp4", content)).await.unwrap();

        assert_eq!(
            run.previous_insights().await,
            vec![
                r#"- From cam.mp4: {"point":"x"}"#.to_string(),
                "- From cam.mp4: Door was open".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn analysis_sends_video_and_context_then_saves() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let run = RunManager::open(&ws, Some("run_b".into())).await.unwrap();
        let generator = CannedGenerator::new(
            r#"{"filename": "other.mp4", "summary": "Booking", "clips": [], "insights": ["Refused aid"]}"#,
        );

        let record = analyze_video(
            &generator,
            &remote("files/v"),
            &[remote("files/d1"), remote("files/d2")],
            "cam.mp4",
            &run,
            None,
        )
        .await
        .unwrap();

        assert_eq!(record.filename, "cam.mp4");
        assert_eq!(record.thinking_process.as_deref(), Some("first\n\nsecond"));
        assert_eq!(*generator.file_counts.lock().unwrap(), vec![3]);

        let saved = run.save_result(&record).await.unwrap();
        assert_eq!(saved, run.result_path("cam.mp4"));
        assert_eq!(
            run.previous_insights().await,
            vec!["- From cam.mp4: Refused aid".to_string()]
        );
    }

    #[tokio::test]
    async fn focus_file_is_optional() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("focus.txt");
        assert_eq!(load_focus(&path).await, None);
        std::fs::write(&path, "  \n").unwrap();
        assert_eq!(load_focus(&path).await, None);
        std::fs::write(&path, "Bail out scene\n").unwrap();
        assert_eq!(load_focus(&path).await.as_deref(), Some("Bail out scene"));
    }

    #[test]
    fn videos_are_found_recursively() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("day2")).unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"").unwrap();
        std::fs::write(dir.path().join("day2/a.mp4"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        std::fs::write(dir.path().join("report.pdf"), b"").unwrap();

        let videos = list_videos(dir.path());
        assert_eq!(
            videos,
            vec![dir.path().join("b.mp4"), dir.path().join("day2/a.mp4")]
        );
        assert_eq!(list_documents(dir.path()), vec![dir.path().join("report.pdf")]);
    }
}
