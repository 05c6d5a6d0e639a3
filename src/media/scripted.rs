// src/media/scripted.rs
//! Deterministic `MediaApi` that replays queued answers. Used by tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;

use super::{MediaApi, OperationHandle, PollOutcome, Submission};
use crate::error::MediaError;
use crate::models::generation::{GenerationRequest, MediaInput};

#[derive(Default)]
pub struct ScriptedMediaApi {
    submissions: Mutex<VecDeque<Result<Submission, MediaError>>>,
    polls: Mutex<VecDeque<Result<PollOutcome, MediaError>>>,
    descriptions: Mutex<VecDeque<Result<String, MediaError>>>,
    submit_calls: AtomicU32,
    poll_calls: AtomicU32,
}

impl ScriptedMediaApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_submission(&self, answer: Result<Submission, MediaError>) {
        self.submissions.lock().await.push_back(answer);
    }

    pub async fn push_poll(&self, answer: Result<PollOutcome, MediaError>) {
        self.polls.lock().await.push_back(answer);
    }

    pub async fn push_description(&self, answer: Result<String, MediaError>) {
        self.descriptions.lock().await.push_back(answer);
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> u32 {
        self.poll_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaApi for ScriptedMediaApi {
    /// With nothing queued, returns one stored URI per requested sample.
    async fn submit(&self, request: &GenerationRequest, request_id: &str) -> Result<Submission, MediaError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(answer) = self.submissions.lock().await.pop_front() {
            return answer;
        }
        let ext = crate::storage::extension_for(request.modality.output_mime_type());
        let uris = (0..request.sample_count)
            .map(|i| format!("gs://scripted/{}/{}/{}.{}", request.modality, request_id, i, ext))
            .collect();
        Ok(Submission::Completed(uris))
    }

    /// With nothing queued, the operation stays pending.
    async fn poll(&self, _handle: &OperationHandle) -> Result<PollOutcome, MediaError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.polls
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(PollOutcome::Pending))
    }

    /// With nothing queued, names the image type.
    async fn describe_image(&self, image: &MediaInput, _instructions: Option<&str>) -> Result<String, MediaError> {
        if let Some(answer) = self.descriptions.lock().await.pop_front() {
            return answer;
        }
        Ok(format!("a scene captured in a {} image", image.mime_type))
    }
}
