// src/media/mod.rs
//! Client side of the hosted generative-media models.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};

use crate::config::PollSettings;
use crate::error::MediaError;
use crate::models::generation::{GenerationRequest, MediaInput, Modality};

pub mod payload;
pub mod response;
pub mod scripted;
pub mod vertex;
pub mod wav;

pub use scripted::ScriptedMediaApi;
pub use vertex::VertexMediaClient;

/// Enough to poll a long-running job again, even from another process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    pub name: String,
    pub model: String,
    pub modality: Modality,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Synchronous models: artifacts are already stored.
    Completed(Vec<String>),
    /// Long-running models: poll the handle.
    Running(OperationHandle),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Pending,
    Succeeded(Vec<String>),
    Failed(String),
}

#[async_trait]
pub trait MediaApi: Send + Sync {
    /// Sends one validated request. `request_id` names the storage folder for
    /// the outputs, so resubmitting the same id never duplicates artifacts.
    async fn submit(&self, request: &GenerationRequest, request_id: &str) -> Result<Submission, MediaError>;

    /// Checks a long-running operation once.
    async fn poll(&self, handle: &OperationHandle) -> Result<PollOutcome, MediaError>;

    /// Writes a generation prompt from a reference image. `instructions`
    /// replaces the default wording when given.
    async fn describe_image(&self, image: &MediaInput, instructions: Option<&str>) -> Result<String, MediaError>;
}

/// Polls `handle` every `settings.interval` until it finishes or
/// `settings.timeout` has passed.
pub async fn wait_for_operation(
    api: &dyn MediaApi,
    handle: &OperationHandle,
    settings: &PollSettings,
) -> Result<Vec<String>, MediaError> {
    let started = Instant::now();
    let deadline = started + settings.timeout;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match api.poll(handle).await {
            Ok(PollOutcome::Succeeded(uris)) if uris.is_empty() => {
                return Err(MediaError::upstream(None, "no media returned"));
            }
            Ok(PollOutcome::Succeeded(uris)) => {
                tracing::info!(
                    operation = %handle.name,
                    attempts = attempt,
                    elapsed_secs = started.elapsed().as_secs(),
                    "✅ operation finished with {} artifact(s)",
                    uris.len()
                );
                return Ok(uris);
            }
            Ok(PollOutcome::Failed(reason)) => return Err(MediaError::upstream(None, reason)),
            Ok(PollOutcome::Pending) => {
                tracing::debug!(operation = %handle.name, attempt, "operation still running");
            }
            Err(e) if e.is_unreachable() => {
                tracing::warn!(operation = %handle.name, attempt, "poll failed, will try again: {}", e);
            }
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::warn!(operation = %handle.name, attempts = attempt, "⏱️ gave up waiting for operation");
            return Err(MediaError::Timeout(settings.timeout));
        }
        sleep(settings.interval.min(deadline - now)).await;
    }
}
