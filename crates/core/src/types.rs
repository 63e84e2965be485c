use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Analysis result for one source video, as written by the analysis stage.
///
/// Only `filename` is strict. Every other field tolerates whatever JSON the
/// model produced, so one oddly typed value never costs a record its clips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub filename: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: String,
    #[serde(default, deserialize_with = "lenient_clips")]
    pub clips: Vec<ClipCandidate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "lenient_list")]
    pub insights: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_opt_string")]
    pub thinking_process: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_opt_string")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_opt_string")]
    pub raw_text: Option<String>,
    /// Any other top-level keys, kept as they came.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnalysisRecord {
    /// Record kept when the model answered with something that isn't JSON.
    pub fn parse_error(filename: &str, raw_text: String, thinking_process: String) -> Self {
        Self {
            filename: filename.to_string(),
            summary: String::new(),
            clips: Vec::new(),
            insights: Vec::new(),
            thinking_process: Some(thinking_process),
            error: Some("JSON Parse Error".to_string()),
            raw_text: Some(raw_text),
            extra: Map::new(),
        }
    }
}

/// A clip the model asked us to cut.
///
/// Free-text fields (`description`, `transcript`, `significance` and anything
/// else) stay in `extra` as raw JSON and reach the output metadata unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipCandidate {
    #[serde(default = "default_time", deserialize_with = "lenient_time")]
    pub start_time: String,
    #[serde(default = "default_time", deserialize_with = "lenient_time")]
    pub end_time: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_time() -> String {
    "0:00".to_string()
}

fn text_of(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Null becomes empty, non-strings their JSON text.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        other => text_of(other),
    })
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        other => Some(text_of(other)),
    })
}

/// Timestamps that aren't strings keep their JSON text, which the timestamp
/// parser then reads as `0`.
fn lenient_time<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => default_time(),
        other => text_of(other),
    })
}

fn lenient_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Value>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    })
}

/// Clip entries that aren't JSON objects are dropped with a warning.
fn lenient_clips<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<ClipCandidate>, D::Error> {
    let items = match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        Value::Null => return Ok(Vec::new()),
        other => {
            warn!("Ignoring clips value that is not a list: {}", other);
            return Ok(Vec::new());
        }
    };

    let mut clips = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<ClipCandidate>(item) {
            Ok(clip) => clips.push(clip),
            Err(e) => warn!("Ignoring clip #{}: {}", index, e),
        }
    }
    Ok(clips)
}

/// One cut clip, as listed in `clips_metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedClip {
    pub id: String,
    pub filename: String,
    pub original_video: String,
    pub duration_seconds: f64,
    pub parent_summary: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

const PROVENANCE_KEYS: [&str; 5] = [
    "id",
    "filename",
    "original_video",
    "duration_seconds",
    "parent_summary",
];

impl ExtractedClip {
    pub fn new(
        id: String,
        filename: String,
        record: &AnalysisRecord,
        candidate: &ClipCandidate,
        duration_seconds: f64,
    ) -> Self {
        let mut extra = candidate.extra.clone();
        for key in PROVENANCE_KEYS {
            extra.remove(key);
        }

        Self {
            id,
            filename,
            original_video: record.filename.clone(),
            duration_seconds,
            parent_summary: record.summary.clone(),
            extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_tolerates_missing_optional_keys() {
        let record: AnalysisRecord = serde_json::from_value(json!({"filename": "a.mp4"})).unwrap();
        assert!(record.clips.is_empty());
        assert_eq!(record.summary, "");

        let missing_filename = serde_json::from_value::<AnalysisRecord>(json!({"summary": "x"}));
        assert!(missing_filename.is_err());
    }

    #[test]
    fn extracted_clip_keeps_text_and_drops_times() {
        let record: AnalysisRecord = serde_json::from_value(json!({
            "filename": "cam.mp4",
            "summary": "Traffic stop",
            "clips": [{
                "start_time": "0:10",
                "end_time": "0:20",
                "description": "Officer approaches",
                "significance": "Tone of the stop",
                "speaker": "Officer 1",
                "id": "bogus"
            }]
        }))
        .unwrap();

        let clip = ExtractedClip::new(
            "clip_001".into(),
            "clip_001.mp4".into(),
            &record,
            &record.clips[0],
            10.0,
        );
        let value = serde_json::to_value(&clip).unwrap();

        assert_eq!(value["id"], "clip_001");
        assert_eq!(value["original_video"], "cam.mp4");
        assert_eq!(value["parent_summary"], "Traffic stop");
        assert_eq!(value["description"], "Officer approaches");
        assert_eq!(value["speaker"], "Officer 1");
        assert!(value.get("start_time").is_none());
        assert!(value.get("end_time").is_none());
        assert!(value.get("transcript").is_none());
    }

    #[test]
    fn oddly_typed_fields_keep_the_record() {
        let record: AnalysisRecord = serde_json::from_value(json!({
            "filename": "cam.mp4",
            "summary": null,
            "insights": [{"point": "x"}, "plain"],
            "clips": [
                {"start_time": "0:10", "end_time": "0:30"},
                {"start_time": "0:40", "end_time": "0:50", "significance": ["a", "b"], "description": null},
                {"start_time": 95, "end_time": "1:40"},
                "not a clip"
            ]
        }))
        .unwrap();

        assert_eq!(record.summary, "");
        assert_eq!(record.insights.len(), 2);
        assert_eq!(record.clips.len(), 3);
        assert_eq!(record.clips[2].start_time, "95");

        let clip = ExtractedClip::new(
            "clip_002".into(),
            "clip_002.mp4".into(),
            &record,
            &record.clips[1],
            10.0,
        );
        let value = serde_json::to_value(&clip).unwrap();
        assert_eq!(value["significance"], json!(["a", "b"]));
        assert_eq!(value.get("description"), Some(&Value::Null));
    }

    #[test]
    fn unknown_record_keys_survive_a_round_trip() {
        let record: AnalysisRecord =
            serde_json::from_value(json!({"filename": "cam.mp4", "camera": "Unit 12"})).unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["camera"], "Unit 12");
    }
}
