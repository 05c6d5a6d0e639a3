// src/media/response.rs
//! Parsers for Vertex AI response bodies.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;

use crate::error::MediaError;

/// One media item in a response, either already stored or inline.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnedMedia {
    Stored(String),
    Inline { data: String, mime_type: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationState {
    Running,
    Done(Vec<ReturnedMedia>),
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct Operation {
    #[serde(default)]
    done: bool,
    error: Option<OperationError>,
    response: Option<OperationResponse>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    #[serde(default)]
    videos: Vec<VideoEntry>,
    generate_video_response: Option<GenerateVideoResponse>,
    rai_media_filtered_count: Option<u32>,
    #[serde(default)]
    rai_media_filtered_reasons: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default)]
    generated_samples: Vec<GeneratedSample>,
    rai_media_filtered_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeneratedSample {
    video: Option<VideoEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoEntry {
    gcs_uri: Option<String>,
    uri: Option<String>,
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
}

impl VideoEntry {
    fn into_media(self) -> Option<ReturnedMedia> {
        if let Some(uri) = self.gcs_uri.or(self.uri) {
            return Some(ReturnedMedia::Stored(uri));
        }
        self.bytes_base64_encoded.map(|data| ReturnedMedia::Inline {
            data,
            mime_type: self.mime_type,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    gcs_uri: Option<String>,
    mime_type: Option<String>,
    rai_filtered_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(rename = "inlineData")]
    inline_data: Option<InlineData>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

fn malformed(what: &str, e: serde_json::Error) -> MediaError {
    MediaError::upstream(None, format!("malformed {} response: {}", what, e))
}

/// Reads a long-running operation (`:predictLongRunning` / `:fetchPredictOperation`).
pub fn parse_operation(body: &Value) -> Result<OperationState, MediaError> {
    let op: Operation = serde_json::from_value(body.clone()).map_err(|e| malformed("operation", e))?;

    if let Some(err) = op.error {
        return Ok(OperationState::Failed(
            err.message.unwrap_or_else(|| "operation failed without a message".to_string()),
        ));
    }
    if !op.done {
        return Ok(OperationState::Running);
    }

    let Some(resp) = op.response else {
        return Ok(OperationState::Done(stored_uris_in(body)));
    };

    let filtered = resp.rai_media_filtered_count.unwrap_or(0)
        + resp
            .generate_video_response
            .as_ref()
            .and_then(|g| g.rai_media_filtered_count)
            .unwrap_or(0);
    let reasons = resp.rai_media_filtered_reasons.join("; ");

    let mut media: Vec<ReturnedMedia> = resp.videos.into_iter().filter_map(VideoEntry::into_media).collect();
    if let Some(gen) = resp.generate_video_response {
        media.extend(
            gen.generated_samples
                .into_iter()
                .filter_map(|s| s.video)
                .filter_map(VideoEntry::into_media),
        );
    }
    if media.is_empty() {
        media = stored_uris_in(body);
    }

    if media.is_empty() && filtered > 0 {
        let reason = if reasons.is_empty() {
            "output was removed by safety filters".to_string()
        } else {
            reasons
        };
        return Ok(OperationState::Failed(reason));
    }
    Ok(OperationState::Done(media))
}

/// Reads a `:predict` response (Imagen, Lyria).
pub fn parse_predictions(body: &Value) -> Result<Vec<ReturnedMedia>, MediaError> {
    let resp: PredictResponse =
        serde_json::from_value(body.clone()).map_err(|e| malformed("prediction", e))?;

    let mut media = Vec::new();
    let mut filtered = Vec::new();
    for p in resp.predictions {
        if let Some(uri) = p.gcs_uri {
            media.push(ReturnedMedia::Stored(uri));
        } else if let Some(data) = p.bytes_base64_encoded {
            media.push(ReturnedMedia::Inline {
                data,
                mime_type: p.mime_type,
            });
        } else if let Some(reason) = p.rai_filtered_reason {
            filtered.push(reason);
        }
    }

    if media.is_empty() && !filtered.is_empty() {
        return Err(MediaError::upstream(None, filtered.join("; ")));
    }
    Ok(media)
}

/// Reads a `:generateContent` response (Gemini image and speech).
pub fn parse_candidates(body: &Value) -> Result<Vec<ReturnedMedia>, MediaError> {
    let resp: GenerateContentResponse =
        serde_json::from_value(body.clone()).map_err(|e| malformed("generateContent", e))?;

    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(MediaError::upstream(None, format!("prompt blocked: {}", reason)));
    }

    let mut finish_reasons = Vec::new();
    let mut media = Vec::new();
    for candidate in resp.candidates {
        if let Some(reason) = candidate.finish_reason {
            finish_reasons.push(reason);
        }
        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
        media.extend(parts.into_iter().filter_map(|p| p.inline_data).map(|d| ReturnedMedia::Inline {
            data: d.data,
            mime_type: d.mime_type,
        }));
    }

    if media.is_empty() {
        if let Some(reason) = finish_reasons.iter().find(|r| r.as_str() != "STOP") {
            return Err(MediaError::upstream(None, format!("generation stopped: {}", reason)));
        }
    }
    Ok(media)
}

/// Reads the text answer of a `:generateContent` call.
pub fn parse_text(body: &Value) -> Result<String, MediaError> {
    let resp: GenerateContentResponse =
        serde_json::from_value(body.clone()).map_err(|e| malformed("generateContent", e))?;

    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(MediaError::upstream(None, format!("prompt blocked: {}", reason)));
    }

    let text: String = resp
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(MediaError::upstream(None, "no text returned"));
    }
    Ok(text.to_string())
}

/// Last resort: every `gs://` URI anywhere in the body.
fn stored_uris_in(body: &Value) -> Vec<ReturnedMedia> {
    static GS_URI: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = GS_URI.get_or_init(|| Regex::new(r#"gs://[^"\s]+"#).ok()) else {
        return Vec::new();
    };
    let text = body.to_string();
    let mut seen = Vec::new();
    for m in re.find_iter(&text) {
        let uri = m.as_str().to_string();
        if !seen.contains(&uri) {
            seen.push(uri);
        }
    }
    seen.into_iter().map(ReturnedMedia::Stored).collect()
}

/// Parses `rate=24000` out of a PCM MIME type such as `audio/L16;codec=pcm;rate=24000`.
pub fn pcm_sample_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|p| p.trim().strip_prefix("rate="))
        .find_map(|r| r.parse().ok())
}

pub fn is_raw_pcm(mime_type: &str) -> bool {
    let lower = mime_type.to_ascii_lowercase();
    lower.starts_with("audio/l16") || lower.contains("codec=pcm")
}
