// src/storage.rs
//! Write-once artifact storage in Google Cloud Storage.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{RetryPolicy, StorageLocation};
use crate::error::{MediaError, ValidationError};
use crate::google_auth::AccessTokenProvider;
use crate::models::generation::{GenerationRequest, MediaInput, Modality};
use crate::retry::with_backoff;

const UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1/b";

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores `bytes` at `path` under the storage root and returns its `gs://` URI.
    /// Writing the same path twice keeps the first object.
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, MediaError>;

    /// The `gs://` URI `path` resolves to, whether or not it exists yet.
    fn uri_for(&self, path: &str) -> String;
}

/// `{modality}/{request_id}/{index}.{ext}`, relative to the storage root.
pub fn artifact_path(modality: Modality, request_id: &str, index: usize, mime_type: &str) -> String {
    format!("{}/{}/{}.{}", modality, request_id, index, extension_for(mime_type))
}

/// Folder a long-running job writes its outputs into.
pub fn artifact_dir(modality: Modality, request_id: &str) -> String {
    format!("{}/{}/", modality, request_id)
}

/// `history/images/{batch_id}/{index}.{ext}`: user-supplied images kept for replay.
pub fn input_path(batch_id: &str, index: usize, mime_type: &str) -> String {
    format!("history/images/{}/{}.{}", batch_id, index, extension_for(mime_type))
}

/// Uploads every inline input image of `request` and swaps its bytes for the
/// stored `gs://` URI, so history keeps references instead of payloads.
pub async fn stage_inputs(
    store: &dyn ArtifactStore,
    mut request: GenerationRequest,
    batch_id: &str,
) -> Result<GenerationRequest, MediaError> {
    let inputs = request
        .input_images
        .iter_mut()
        .chain(request.last_frame.iter_mut())
        .filter(|input| input.is_inline());

    for (index, input) in inputs.enumerate() {
        let bytes = decode_inline(input)?;
        let path = input_path(batch_id, index, &input.mime_type);
        let uri = store.put(&path, bytes, &input.mime_type).await?;
        input.gcs_uri = Some(uri);
        input.bytes_base64_encoded = None;
    }
    Ok(request)
}

fn decode_inline(input: &MediaInput) -> Result<Vec<u8>, MediaError> {
    let data = input.bytes_base64_encoded.as_deref().unwrap_or_default().trim();
    STANDARD.decode(data).map_err(|e| {
        MediaError::from(ValidationError::invalid(
            "inputImages",
            format!("image is not valid base64: {}", e),
        ))
    })
}

pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "video/mp4" => "mp4",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/mpeg" => "mp3",
        _ => "bin",
    }
}

/// Browser-facing URL for a `gs://` URI.
pub fn public_url(gs_uri: &str) -> Option<String> {
    let rest = gs_uri.strip_prefix("gs://")?;
    let (bucket, object) = rest.split_once('/')?;
    if bucket.is_empty() || object.is_empty() {
        return None;
    }
    Some(format!("https://storage.googleapis.com/{}/{}", bucket, object))
}

pub struct GcsArtifactStore {
    client: Client,
    auth: Arc<dyn AccessTokenProvider>,
    location: StorageLocation,
    retry: RetryPolicy,
}

impl GcsArtifactStore {
    pub fn new(
        client: Client,
        auth: Arc<dyn AccessTokenProvider>,
        location: StorageLocation,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            auth,
            location,
            retry,
        }
    }

    async fn upload_once(&self, object: &str, bytes: &[u8], content_type: &str) -> Result<(), MediaError> {
        let token = self.auth.access_token().await?;
        let url = format!(
            "{}/{}/o?uploadType=media&ifGenerationMatch=0&name={}",
            UPLOAD_BASE,
            self.location.bucket,
            urlencoding::encode(object)
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Content-Type", content_type)
            .body(bytes.to_vec())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        // ifGenerationMatch=0 fails when the object is already there.
        if status == StatusCode::PRECONDITION_FAILED {
            tracing::debug!(object = %object, "object already present, keeping existing copy");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            return Err(MediaError::Transient(format!("GCS upload returned {}", status)));
        }
        Err(MediaError::Storage(format!("GCS upload returned {}: {}", status, body.trim())))
    }
}

#[async_trait]
impl ArtifactStore for GcsArtifactStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, MediaError> {
        let object = self.location.object_name(path);
        with_backoff(&self.retry, "gcs upload", || self.upload_once(&object, &bytes, content_type))
            .await
            .map_err(|e| match e {
                MediaError::Transient(reason) => MediaError::Storage(reason),
                other => other,
            })?;

        let uri = self.location.uri_for(path);
        tracing::info!(uri = %uri, size = bytes.len(), "☁️ artifact stored");
        Ok(uri)
    }

    fn uri_for(&self, path: &str) -> String {
        self.location.uri_for(path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// In-process store with the same write-once behavior.
pub struct MemoryArtifactStore {
    location: StorageLocation,
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryArtifactStore {
    pub fn new(location: StorageLocation) -> Self {
        Self {
            location,
            objects: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, uri: &str) -> Option<StoredObject> {
        self.objects.read().await.get(uri).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, MediaError> {
        let uri = self.location.uri_for(path);
        self.objects
            .write()
            .await
            .entry(uri.clone())
            .or_insert_with(|| StoredObject {
                bytes,
                content_type: content_type.to_string(),
            });
        Ok(uri)
    }

    fn uri_for(&self, path: &str) -> String {
        self.location.uri_for(path)
    }
}
