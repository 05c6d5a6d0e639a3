// src/media/vertex.rs
//! `MediaApi` over the Vertex AI REST endpoints.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;

use super::payload::{self, model_path, model_url, Rpc};
use super::response::{self, is_raw_pcm, pcm_sample_rate, OperationState, ReturnedMedia};
use super::wav::{pcm16_to_wav, TTS_SAMPLE_RATE};
use super::{MediaApi, OperationHandle, PollOutcome, Submission};
use crate::config::RetryPolicy;
use crate::error::MediaError;
use crate::google_auth::AccessTokenProvider;
use crate::models::generation::{GenerationRequest, MediaInput, Modality};
use crate::retry::with_backoff;
use crate::storage::{artifact_dir, artifact_path, ArtifactStore};

pub struct VertexMediaClient {
    client: Client,
    auth: Arc<dyn AccessTokenProvider>,
    store: Arc<dyn ArtifactStore>,
    project_id: String,
    location: String,
    retry: RetryPolicy,
    /// Replaces the public Vertex AI host, e.g. for a local stub.
    base_url: Option<String>,
}

impl VertexMediaClient {
    pub fn new(
        client: Client,
        auth: Arc<dyn AccessTokenProvider>,
        store: Arc<dyn ArtifactStore>,
        project_id: impl Into<String>,
        location: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            auth,
            store,
            project_id: project_id.into(),
            location: location.into(),
            retry,
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    fn url_for(&self, model: &str, global: bool, method: &str) -> String {
        match &self.base_url {
            Some(base) => format!(
                "{}{}",
                base,
                model_path(&self.project_id, &self.location, model, global, method)
            ),
            None => model_url(&self.project_id, &self.location, model, global, method),
        }
    }

    async fn post_once(&self, url: &str, body: &Value) -> Result<Value, MediaError> {
        let token = self.auth.access_token().await?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .header("Content-Type", "application/json; charset=utf-8")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &text));
        }
        Ok(response.json().await?)
    }

    /// POSTs with bounded retries. A transient failure that outlives the retry
    /// budget stays transient so pollers can tell an outage from a verdict.
    async fn post_json(&self, label: &str, url: &str, body: &Value) -> Result<Value, MediaError> {
        with_backoff(&self.retry, label, || self.post_once(url, body)).await
    }

    /// Turns returned media into storage URIs, uploading inline payloads.
    async fn materialize(
        &self,
        modality: Modality,
        request_id: &str,
        media: Vec<ReturnedMedia>,
    ) -> Result<Vec<String>, MediaError> {
        let mut uris = Vec::with_capacity(media.len());
        for (index, item) in media.into_iter().enumerate() {
            match item {
                ReturnedMedia::Stored(uri) => uris.push(uri),
                ReturnedMedia::Inline { data, mime_type } => {
                    let decoded = STANDARD.decode(data.trim()).map_err(|e| {
                        MediaError::upstream(None, format!("undecodable inline media: {}", e))
                    })?;
                    let (bytes, content_type) = normalize(modality, decoded, mime_type.as_deref())?;
                    let path = artifact_path(modality, request_id, index, &content_type);
                    uris.push(self.store.put(&path, bytes, &content_type).await?);
                }
            }
        }
        Ok(uris)
    }
}

/// Picks the stored content type and wraps raw speech PCM into WAV.
fn normalize(
    modality: Modality,
    bytes: Vec<u8>,
    mime_type: Option<&str>,
) -> Result<(Vec<u8>, String), MediaError> {
    match mime_type {
        Some(mime) if is_raw_pcm(mime) => {
            let rate = pcm_sample_rate(mime).unwrap_or(TTS_SAMPLE_RATE);
            Ok((pcm16_to_wav(&bytes, rate)?, "audio/wav".to_string()))
        }
        None if modality == Modality::TextToVoice => {
            Ok((pcm16_to_wav(&bytes, TTS_SAMPLE_RATE)?, "audio/wav".to_string()))
        }
        Some(mime) if mime.starts_with("image/") || mime.starts_with("video/") || mime.starts_with("audio/") => {
            Ok((bytes, mime.to_string()))
        }
        _ => Ok((bytes, modality.output_mime_type().to_string())),
    }
}

/// Maps a non-2xx answer to an error, keeping the upstream message verbatim.
fn parse_error(status: u16, text: &str) -> MediaError {
    let message = serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                format!("upstream returned HTTP {}", status)
            } else {
                trimmed.chars().take(500).collect()
            }
        });

    match status {
        408 | 500 | 502 | 503 | 504 => MediaError::Transient(message),
        _ => MediaError::upstream(Some(status), message),
    }
}

#[async_trait]
impl MediaApi for VertexMediaClient {
    async fn submit(&self, request: &GenerationRequest, request_id: &str) -> Result<Submission, MediaError> {
        let modality = request.modality;
        let output_uri = self.store.uri_for(&artifact_dir(modality, request_id));
        let payload = payload::build(request, &output_uri);
        let url = self.url_for(&payload.model, payload.global, payload.rpc.as_str());

        tracing::info!(
            request_id = %request_id,
            modality = %modality,
            model = %payload.model,
            "🚀 submitting generation request"
        );

        let body = self.post_json(payload.rpc.as_str(), &url, &payload.body).await?;

        let media = match payload.rpc {
            Rpc::PredictLongRunning => {
                let name = body["name"]
                    .as_str()
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| MediaError::upstream(None, "operation name missing from response"))?;
                tracing::info!(request_id = %request_id, operation = %name, "⏳ long-running operation started");
                return Ok(Submission::Running(OperationHandle {
                    name: name.to_string(),
                    model: payload.model,
                    modality,
                    request_id: request_id.to_string(),
                }));
            }
            Rpc::Predict => response::parse_predictions(&body)?,
            Rpc::GenerateContent => response::parse_candidates(&body)?,
        };

        let uris = self.materialize(modality, request_id, media).await?;
        if uris.is_empty() {
            return Err(MediaError::upstream(None, "no media returned"));
        }
        Ok(Submission::Completed(uris))
    }

    async fn poll(&self, handle: &OperationHandle) -> Result<PollOutcome, MediaError> {
        let url = self.url_for(&handle.model, false, "fetchPredictOperation");
        let body = self
            .post_json("fetchPredictOperation", &url, &json!({ "operationName": handle.name }))
            .await?;

        match response::parse_operation(&body)? {
            OperationState::Running => Ok(PollOutcome::Pending),
            OperationState::Failed(reason) => Ok(PollOutcome::Failed(reason)),
            OperationState::Done(media) => {
                let uris = self.materialize(handle.modality, &handle.request_id, media).await?;
                Ok(PollOutcome::Succeeded(uris))
            }
        }
    }

    async fn describe_image(&self, image: &MediaInput, instructions: Option<&str>) -> Result<String, MediaError> {
        let payload = payload::describe_image(image, instructions);
        let url = self.url_for(&payload.model, payload.global, payload.rpc.as_str());

        let body = self.post_json("describeImage", &url, &payload.body).await?;
        let prompt = response::parse_text(&body)?;
        tracing::info!(model = %payload.model, chars = prompt.len(), "📝 prompt written from image");
        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageLocation;
    use crate::google_auth::StaticToken;
    use crate::models::generation::RawParams;
    use crate::storage::MemoryArtifactStore;
    use axum::{
        extract::State,
        http::{HeaderMap, StatusCode, Uri},
        Json, Router,
    };
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Local stand-in for the Vertex endpoints: answers in order, records requests.
    #[derive(Default)]
    struct Stub {
        answers: Mutex<VecDeque<(u16, Value)>>,
        seen: Mutex<Vec<SeenRequest>>,
    }

    #[derive(Debug, Clone)]
    struct SeenRequest {
        path: String,
        authorization: Option<String>,
        body: Value,
    }

    async fn answer(
        State(stub): State<Arc<Stub>>,
        uri: Uri,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        stub.seen.lock().await.push(SeenRequest {
            path: uri.path().to_string(),
            authorization: headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body,
        });
        let (status, body) = stub
            .answers
            .lock()
            .await
            .pop_front()
            .unwrap_or((404, json!({ "error": { "message": "no answer queued" } })));
        (StatusCode::from_u16(status).unwrap(), Json(body))
    }

    async fn serve(stub: Arc<Stub>) -> String {
        let app = Router::new().fallback(answer).with_state(stub);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    struct Fixture {
        stub: Arc<Stub>,
        store: Arc<MemoryArtifactStore>,
        client: VertexMediaClient,
    }

    async fn fixture_with_auth(auth: Arc<dyn AccessTokenProvider>) -> Fixture {
        let stub = Arc::new(Stub::default());
        let base = serve(stub.clone()).await;
        let store = Arc::new(MemoryArtifactStore::new(
            StorageLocation::parse("gs://studio-bucket/outputs").unwrap(),
        ));
        let client = VertexMediaClient::new(
            Client::new(),
            auth,
            store.clone(),
            "demo",
            "us-central1",
            RetryPolicy::immediate(2),
        )
        .with_base_url(base);
        Fixture { stub, store, client }
    }

    async fn fixture() -> Fixture {
        fixture_with_auth(Arc::new(StaticToken("test-token".into()))).await
    }

    impl Fixture {
        async fn queue(&self, status: u16, body: Value) {
            self.stub.answers.lock().await.push_back((status, body));
        }

        async fn seen(&self) -> Vec<SeenRequest> {
            self.stub.seen.lock().await.clone()
        }
    }

    struct FailingAuth;

    #[async_trait]
    impl AccessTokenProvider for FailingAuth {
        async fn access_token(&self) -> Result<String, MediaError> {
            Err(MediaError::Auth("metadata server unreachable".into()))
        }
    }

    fn image_request(samples: u32) -> GenerationRequest {
        GenerationRequest::from_raw(RawParams {
            modality: Some("text-to-image".into()),
            prompt: Some("a red kite over dunes".into()),
            sample_count: Some(samples),
            ..Default::default()
        })
        .unwrap()
    }

    fn video_handle() -> OperationHandle {
        OperationHandle {
            name: "projects/demo/locations/us-central1/publishers/google/models/veo-3.1-generate-preview/operations/op-7".into(),
            model: "veo-3.1-generate-preview".into(),
            modality: Modality::TextToVideo,
            request_id: "req-2".into(),
        }
    }

    #[tokio::test]
    async fn test_inline_predictions_are_uploaded() {
        let f = fixture().await;
        f.queue(200, json!({ "predictions": [
            { "bytesBase64Encoded": "cG5nLTA=", "mimeType": "image/png" },
            { "bytesBase64Encoded": "cG5nLTE=", "mimeType": "image/png" }
        ]}))
        .await;

        let submission = f.client.submit(&image_request(2), "req-1").await.unwrap();
        let Submission::Completed(uris) = submission else {
            panic!("expected completed submission");
        };
        assert_eq!(
            uris,
            vec![
                "gs://studio-bucket/outputs/text-to-image/req-1/0.png".to_string(),
                "gs://studio-bucket/outputs/text-to-image/req-1/1.png".to_string(),
            ]
        );
        assert_eq!(f.store.get(&uris[1]).await.unwrap().bytes, b"png-1".to_vec());

        let seen = f.seen().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].path,
            "/v1/projects/demo/locations/us-central1/publishers/google/models/imagen-4.0-generate-001:predict"
        );
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer test-token"));
        assert_eq!(seen[0].body["instances"][0]["prompt"], "a red kite over dunes");
    }

    #[tokio::test]
    async fn test_empty_predictions_mean_no_media() {
        let f = fixture().await;
        f.queue(200, json!({ "predictions": [] })).await;

        let err = f.client.submit(&image_request(1), "req-1").await.unwrap_err();
        assert_eq!(err.to_string(), "no media returned");
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_video_submission_returns_operation_handle() {
        let f = fixture().await;
        let handle = video_handle();
        f.queue(200, json!({ "name": handle.name })).await;

        let request = GenerationRequest::from_raw(RawParams {
            modality: Some("text-to-video".into()),
            prompt: Some("a lighthouse in a storm".into()),
            duration_seconds: Some(8),
            ..Default::default()
        })
        .unwrap();
        let submission = f.client.submit(&request, "req-2").await.unwrap();

        assert_eq!(submission, Submission::Running(handle));
        let seen = f.seen().await;
        assert!(seen[0].path.ends_with("/models/veo-3.1-generate-preview:predictLongRunning"));
        assert_eq!(
            seen[0].body["parameters"]["storageUri"],
            "gs://studio-bucket/outputs/text-to-video/req-2/"
        );
    }

    #[tokio::test]
    async fn test_poll_reads_stored_videos() {
        let f = fixture().await;
        f.queue(200, json!({ "name": "op-7", "done": false })).await;
        f.queue(200, json!({
            "name": "op-7",
            "done": true,
            "response": { "videos": [
                { "gcsUri": "gs://studio-bucket/outputs/text-to-video/req-2/sample_0.mp4", "mimeType": "video/mp4" }
            ]}
        }))
        .await;

        assert_eq!(f.client.poll(&video_handle()).await.unwrap(), PollOutcome::Pending);
        assert_eq!(
            f.client.poll(&video_handle()).await.unwrap(),
            PollOutcome::Succeeded(vec![
                "gs://studio-bucket/outputs/text-to-video/req-2/sample_0.mp4".to_string()
            ])
        );

        let seen = f.seen().await;
        assert!(seen[1].path.ends_with("/models/veo-3.1-generate-preview:fetchPredictOperation"));
        assert_eq!(seen[1].body["operationName"], video_handle().name);
    }

    #[tokio::test]
    async fn test_poll_without_a_token_is_unreachable() {
        let f = fixture_with_auth(Arc::new(FailingAuth)).await;

        let err = f.client.poll(&video_handle()).await.unwrap_err();
        assert!(matches!(err, MediaError::Auth(_)));
        assert!(err.is_unreachable());
        assert!(f.seen().await.is_empty());
    }

    #[tokio::test]
    async fn test_server_errors_stay_transient_after_retries() {
        let f = fixture().await;
        for _ in 0..3 {
            f.queue(503, json!({ "error": { "message": "The service is currently unavailable." } }))
                .await;
        }

        let err = f.client.poll(&video_handle()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(f.seen().await.len(), 3);
    }

    #[tokio::test]
    async fn test_describe_image_returns_prompt() {
        let f = fixture().await;
        f.queue(200, json!({ "candidates": [{
            "content": { "role": "model", "parts": [{ "text": " A red kite over dunes at noon. " }] },
            "finishReason": "STOP"
        }]}))
        .await;

        let image = MediaInput {
            gcs_uri: Some("gs://studio-bucket/in.png".into()),
            bytes_base64_encoded: None,
            mime_type: "image/png".into(),
        };
        let prompt = f.client.describe_image(&image, None).await.unwrap();

        assert_eq!(prompt, "A red kite over dunes at noon.");
        let seen = f.seen().await;
        assert_eq!(
            seen[0].path,
            "/v1/projects/demo/locations/global/publishers/google/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(seen[0].body["contents"][0]["parts"][0]["fileData"]["fileUri"], "gs://studio-bucket/in.png");
    }

    #[test]
    fn test_error_message_is_taken_from_body() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded for aiplatform.googleapis.com/generate_content_requests","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = parse_error(429, body);
        assert!(!err.is_transient());
        assert_eq!(
            err.to_string(),
            "Quota exceeded for aiplatform.googleapis.com/generate_content_requests"
        );
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert!(parse_error(503, "Service Unavailable").is_transient());
        assert!(!parse_error(403, "Permission denied").is_transient());
        assert_eq!(parse_error(400, "").to_string(), "upstream returned HTTP 400");
    }

    #[test]
    fn test_speech_pcm_becomes_wav() {
        let (bytes, content_type) = normalize(
            Modality::TextToVoice,
            vec![0, 0, 1, 0],
            Some("audio/L16;codec=pcm;rate=24000"),
        )
        .unwrap();
        assert_eq!(content_type, "audio/wav");
        assert_eq!(&bytes[0..4], b"RIFF");

        let (_, image_type) = normalize(Modality::ImageToImage, vec![1], Some("image/jpeg")).unwrap();
        assert_eq!(image_type, "image/jpeg");

        let (_, fallback) = normalize(Modality::TextToImage, vec![1], None).unwrap();
        assert_eq!(fallback, "image/png");
    }
}
