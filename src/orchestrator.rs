// src/orchestrator.rs
//! Drives one generation from submission to a terminal history record.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::PollSettings;
use crate::error::{MediaError, StoreError};
use crate::history::HistoryStore;
use crate::media::{wait_for_operation, MediaApi, PollOutcome, Submission};
use crate::models::generation::{GenerationRequest, MediaInput, RawParams};
use crate::models::history::{HistoryPage, NewRecord, PendingOperation, RecordId, TerminalOutcome};
use crate::storage::{stage_inputs, ArtifactStore};

/// Reason stored on records whose operation outlived the poll timeout.
pub const TIMEOUT_REASON: &str = "timeout";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Validation,
    External,
    Timeout,
    Store,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OrchestrationResult {
    Succeeded {
        record_id: RecordId,
        artifacts: Vec<String>,
    },
    Failed {
        #[serde(skip_serializing_if = "Option::is_none")]
        record_id: Option<RecordId>,
        kind: FailureKind,
        reason: String,
    },
}

impl OrchestrationResult {
    fn failed(record_id: Option<RecordId>, kind: FailureKind, reason: impl Into<String>) -> Self {
        OrchestrationResult::Failed {
            record_id,
            kind,
            reason: reason.into(),
        }
    }

    pub fn record_id(&self) -> Option<&str> {
        match self {
            OrchestrationResult::Succeeded { record_id, .. } => Some(record_id),
            OrchestrationResult::Failed { record_id, .. } => record_id.as_deref(),
        }
    }
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeSummary {
    pub checked: usize,
    pub succeeded: Vec<RecordId>,
    pub failed: Vec<RecordId>,
    pub still_running: Vec<RecordId>,
    /// Could not be polled this time. Still pending and still tracked.
    pub unreachable: Vec<RecordId>,
    /// Finished, but the record had already been settled by someone else.
    pub already_settled: Vec<RecordId>,
}

pub struct Orchestrator {
    media: Arc<dyn MediaApi>,
    history: Arc<dyn HistoryStore>,
    artifacts: Arc<dyn ArtifactStore>,
    poll: PollSettings,
}

impl Orchestrator {
    pub fn new(
        media: Arc<dyn MediaApi>,
        history: Arc<dyn HistoryStore>,
        artifacts: Arc<dyn ArtifactStore>,
        poll: PollSettings,
    ) -> Self {
        Self {
            media,
            history,
            artifacts,
            poll,
        }
    }

    /// Validates `params`, records the attempt, runs it and records the outcome.
    /// Invalid parameters are rejected without touching history.
    pub async fn generate(&self, user_id: &str, params: RawParams) -> OrchestrationResult {
        match GenerationRequest::from_raw(params) {
            Ok(request) => self.run(user_id, request).await,
            Err(e) => {
                tracing::info!(user_id = %user_id, "request rejected: {}", e);
                OrchestrationResult::failed(None, FailureKind::Validation, e.to_string())
            }
        }
    }

    /// Runs a past generation again with its stored parameters.
    pub async fn replay(&self, user_id: &str, record_id: &str) -> Result<OrchestrationResult, StoreError> {
        let record = self.history.get(user_id, record_id).await?;
        tracing::info!(user_id = %user_id, source = %record_id, "🔁 replaying generation");
        Ok(self.generate(user_id, RawParams::from(&record.params)).await)
    }

    pub async fn history(&self, user_id: &str, page_token: Option<&str>) -> Result<HistoryPage, StoreError> {
        self.history.list_page(user_id, page_token).await
    }

    /// Drafts a generation prompt from a reference image. Nothing is recorded.
    pub async fn describe_image(&self, image: &MediaInput, instructions: Option<&str>) -> Result<String, MediaError> {
        image.validate("image")?;
        self.media.describe_image(image, instructions).await
    }

    /// Polls every tracked operation of `user_id` once and records the ones
    /// that have finished. Only the operation's own verdict settles a record;
    /// an outage on the way leaves it pending and tracked.
    pub async fn resume_pending(&self, user_id: &str) -> Result<ResumeSummary, StoreError> {
        let operations = self.history.pending_operations(user_id).await?;
        let mut summary = ResumeSummary {
            checked: operations.len(),
            ..Default::default()
        };

        for op in operations {
            let outcome = match self.media.poll(&op.handle).await {
                Ok(PollOutcome::Pending) => {
                    summary.still_running.push(op.record_id);
                    continue;
                }
                Ok(PollOutcome::Succeeded(uris)) if uris.is_empty() => {
                    TerminalOutcome::Failed("no media returned".to_string())
                }
                Ok(PollOutcome::Succeeded(uris)) => TerminalOutcome::Succeeded(uris),
                Ok(PollOutcome::Failed(reason)) => TerminalOutcome::Failed(reason),
                Err(MediaError::Upstream { status: Some(404), reason }) => {
                    TerminalOutcome::Failed(format!("operation no longer exists: {}", reason))
                }
                Err(e) => {
                    tracing::warn!(record_id = %op.record_id, "could not poll operation, leaving it tracked: {}", e);
                    summary.unreachable.push(op.record_id);
                    continue;
                }
            };

            let settled_here = match self.history.update_status(&op.record_id, &outcome).await {
                Ok(()) => true,
                Err(StoreError::Conflict { .. }) | Err(StoreError::NotFound(_)) => false,
                Err(e) => return Err(e),
            };
            self.forget_operation(&op.record_id).await;

            match (settled_here, outcome) {
                (false, _) => summary.already_settled.push(op.record_id),
                (true, TerminalOutcome::Succeeded(_)) => summary.succeeded.push(op.record_id),
                (true, TerminalOutcome::Failed(_)) => summary.failed.push(op.record_id),
            }
        }

        tracing::info!(
            user_id = %user_id,
            checked = summary.checked,
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            still_running = summary.still_running.len(),
            unreachable = summary.unreachable.len(),
            already_settled = summary.already_settled.len(),
            "pending operations reconciled"
        );
        Ok(summary)
    }

    async fn run(&self, user_id: &str, request: GenerationRequest) -> OrchestrationResult {
        // History keeps storage references, never inline image bytes.
        let batch_id = Uuid::new_v4().to_string();
        let request = match stage_inputs(self.artifacts.as_ref(), request, &batch_id).await {
            Ok(request) => request,
            Err(MediaError::Validation(e)) => {
                return OrchestrationResult::failed(None, FailureKind::Validation, e.to_string());
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, "❌ could not store input images: {}", e);
                return OrchestrationResult::failed(None, FailureKind::External, e.to_string());
            }
        };

        let record_id = match self.history.append(NewRecord::new(user_id, request.clone())).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(user_id = %user_id, "❌ could not record generation: {}", e);
                return OrchestrationResult::failed(None, FailureKind::Store, e.to_string());
            }
        };

        let (outcome, kind) = match self.execute(user_id, &record_id, &request).await {
            Ok(uris) => (TerminalOutcome::Succeeded(uris), None),
            Err(MediaError::Timeout(after)) => {
                tracing::warn!(record_id = %record_id, "generation timed out after {:?}", after);
                (TerminalOutcome::Failed(TIMEOUT_REASON.to_string()), Some(FailureKind::Timeout))
            }
            Err(MediaError::Validation(e)) => {
                (TerminalOutcome::Failed(e.to_string()), Some(FailureKind::Validation))
            }
            Err(e) => {
                tracing::warn!(record_id = %record_id, "generation failed: {}", e);
                (TerminalOutcome::Failed(e.to_string()), Some(FailureKind::External))
            }
        };

        if let Err(e) = self.history.update_status(&record_id, &outcome).await {
            tracing::error!(record_id = %record_id, "❌ could not record outcome: {}", e);
            return OrchestrationResult::failed(
                Some(record_id),
                FailureKind::Store,
                format!("generation finished but its outcome could not be recorded: {}", e),
            );
        }
        if request.modality.is_long_running() {
            self.forget_operation(&record_id).await;
        }

        match (outcome, kind) {
            (TerminalOutcome::Succeeded(artifacts), _) => {
                tracing::info!(record_id = %record_id, count = artifacts.len(), "🎉 generation succeeded");
                OrchestrationResult::Succeeded { record_id, artifacts }
            }
            (TerminalOutcome::Failed(reason), kind) => {
                OrchestrationResult::failed(Some(record_id), kind.unwrap_or(FailureKind::External), reason)
            }
        }
    }

    async fn execute(
        &self,
        user_id: &str,
        record_id: &str,
        request: &GenerationRequest,
    ) -> Result<Vec<String>, MediaError> {
        match self.media.submit(request, record_id).await? {
            Submission::Completed(uris) if uris.is_empty() => {
                Err(MediaError::upstream(None, "no media returned"))
            }
            Submission::Completed(uris) => Ok(uris),
            Submission::Running(handle) => {
                let tracked = PendingOperation {
                    record_id: record_id.to_string(),
                    user_id: user_id.to_string(),
                    handle: handle.clone(),
                    created_at: Utc::now(),
                };
                if let Err(e) = self.history.track_operation(&tracked).await {
                    tracing::warn!(record_id = %record_id, "could not track operation: {}", e);
                }
                wait_for_operation(self.media.as_ref(), &handle, &self.poll).await
            }
        }
    }

    async fn forget_operation(&self, record_id: &str) {
        if let Err(e) = self.history.clear_operation(record_id).await {
            tracing::warn!(record_id = %record_id, "could not clear tracked operation: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryPolicy, StorageLocation};
    use crate::google_auth::AccessTokenProvider;
    use crate::history::MemoryHistoryStore;
    use crate::media::{OperationHandle, ScriptedMediaApi, VertexMediaClient};
    use crate::models::generation::Modality;
    use crate::models::history::RecordStatus;
    use crate::storage::MemoryArtifactStore;
    use async_trait::async_trait;
    use std::time::Duration;

    const USER: &str = "ana@example.com";

    struct Harness {
        media: Arc<ScriptedMediaApi>,
        history: Arc<MemoryHistoryStore>,
        artifacts: Arc<MemoryArtifactStore>,
        orchestrator: Orchestrator,
    }

    fn poll_settings(timeout: Duration) -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(2),
            timeout,
        }
    }

    fn artifact_store() -> Arc<MemoryArtifactStore> {
        Arc::new(MemoryArtifactStore::new(
            StorageLocation::parse("gs://studio-bucket/outputs").unwrap(),
        ))
    }

    fn harness(timeout: Duration) -> Harness {
        let media = Arc::new(ScriptedMediaApi::new());
        let history = Arc::new(MemoryHistoryStore::new());
        let artifacts = artifact_store();
        let orchestrator = Orchestrator::new(
            media.clone(),
            history.clone(),
            artifacts.clone(),
            poll_settings(timeout),
        );
        Harness {
            media,
            history,
            artifacts,
            orchestrator,
        }
    }

    struct FailingAuth;

    #[async_trait]
    impl AccessTokenProvider for FailingAuth {
        async fn access_token(&self) -> Result<String, MediaError> {
            Err(MediaError::Auth("metadata server unreachable".into()))
        }
    }

    async fn tracked_video(history: &MemoryHistoryStore) -> RecordId {
        let request = GenerationRequest::from_raw(video()).unwrap();
        let id = history.append(NewRecord::new(USER, request)).await.unwrap();
        history
            .track_operation(&PendingOperation {
                record_id: id.clone(),
                user_id: USER.into(),
                handle: handle(&id),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        id
    }

    fn inline_png(data: &str) -> MediaInput {
        MediaInput {
            gcs_uri: None,
            bytes_base64_encoded: Some(data.into()),
            mime_type: "image/png".into(),
        }
    }

    fn image(prompt: &str, samples: u32) -> RawParams {
        RawParams {
            modality: Some("text-to-image".into()),
            prompt: Some(prompt.into()),
            sample_count: Some(samples),
            ..Default::default()
        }
    }

    fn video() -> RawParams {
        RawParams {
            modality: Some("text-to-video".into()),
            prompt: Some("a lighthouse in a storm".into()),
            duration_seconds: Some(8),
            ..Default::default()
        }
    }

    fn handle(request_id: &str) -> OperationHandle {
        OperationHandle {
            name: format!("operations/{}", request_id),
            model: "veo-3.1-generate-preview".into(),
            modality: Modality::TextToVideo,
            request_id: request_id.into(),
        }
    }

    #[tokio::test]
    async fn test_image_generation_records_both_artifacts() {
        let h = harness(Duration::from_secs(1));
        let result = h.orchestrator.generate(USER, image("a red bicycle", 2)).await;

        let OrchestrationResult::Succeeded { record_id, artifacts } = result else {
            panic!("expected success");
        };
        assert_eq!(artifacts.len(), 2);

        let record = h.history.get(USER, &record_id).await.unwrap();
        assert_eq!(record.status, RecordStatus::Succeeded);
        assert_eq!(record.artifacts, artifacts);
        assert_eq!(record.params.prompt, "a red bicycle");
        assert!(record.completed_at.is_some());

        let page = h.orchestrator.history(USER, None).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].artifacts, artifacts);
    }

    #[tokio::test]
    async fn test_inline_inputs_are_stored_before_recording() {
        let h = harness(Duration::from_secs(1));
        let params = RawParams {
            modality: Some("image-to-image".into()),
            prompt: Some("make it night".into()),
            input_images: vec![inline_png("ZGF5")],
            ..Default::default()
        };

        let result = h.orchestrator.generate(USER, params).await;
        let Some(record_id) = result.record_id() else {
            panic!("expected a record");
        };

        let record = h.history.get(USER, record_id).await.unwrap();
        let stored = &record.params.input_images[0];
        assert!(stored.bytes_base64_encoded.is_none());
        let uri = stored.gcs_uri.as_deref().unwrap();
        assert!(uri.starts_with("gs://studio-bucket/outputs/history/images/"));
        assert_eq!(h.artifacts.get(uri).await.unwrap().bytes, b"day".to_vec());
    }

    #[tokio::test]
    async fn test_undecodable_input_is_rejected_without_a_record() {
        let h = harness(Duration::from_secs(1));
        let params = RawParams {
            modality: Some("image-to-image".into()),
            prompt: Some("make it night".into()),
            input_images: vec![inline_png("not base64!")],
            ..Default::default()
        };

        let result = h.orchestrator.generate(USER, params).await;
        assert!(matches!(
            result,
            OrchestrationResult::Failed {
                record_id: None,
                kind: FailureKind::Validation,
                ..
            }
        ));
        assert_eq!(h.history.count().await, 0);
        assert!(h.artifacts.is_empty().await);
    }

    #[tokio::test]
    async fn test_describe_image_checks_the_image_first() {
        let h = harness(Duration::from_secs(1));
        h.media.push_description(Ok("a foggy harbor at dawn".into())).await;

        let prompt = h.orchestrator.describe_image(&inline_png("aGFyYm9y"), None).await.unwrap();
        assert_eq!(prompt, "a foggy harbor at dawn");

        let gif = MediaInput {
            mime_type: "image/gif".into(),
            ..inline_png("aGFyYm9y")
        };
        let err = h.orchestrator.describe_image(&gif, None).await.unwrap_err();
        assert!(matches!(err, MediaError::Validation(_)));
    }

    #[tokio::test]
    async fn test_missing_duration_is_rejected_without_a_record() {
        let h = harness(Duration::from_secs(1));
        let mut params = video();
        params.duration_seconds = None;

        let result = h.orchestrator.generate(USER, params).await;
        assert!(matches!(
            result,
            OrchestrationResult::Failed {
                record_id: None,
                kind: FailureKind::Validation,
                ..
            }
        ));
        assert_eq!(h.history.count().await, 0);
        assert_eq!(h.media.submit_calls(), 0);
    }

    #[tokio::test]
    async fn test_video_timeout_is_recorded() {
        let h = harness(Duration::from_millis(20));
        h.media
            .push_submission(Ok(Submission::Running(handle("op-1"))))
            .await;

        let result = h.orchestrator.generate(USER, video()).await;
        let OrchestrationResult::Failed { record_id: Some(id), kind, reason } = result else {
            panic!("expected failure");
        };
        assert_eq!(kind, FailureKind::Timeout);
        assert_eq!(reason, "timeout");

        let record = h.history.get(USER, &id).await.unwrap();
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("timeout"));
        assert!(record.artifacts.is_empty());
        assert!(h.history.pending_operations(USER).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_video_success_after_polling() {
        let h = harness(Duration::from_secs(1));
        h.media
            .push_submission(Ok(Submission::Running(handle("op-2"))))
            .await;
        h.media.push_poll(Ok(PollOutcome::Pending)).await;
        h.media
            .push_poll(Ok(PollOutcome::Succeeded(vec!["gs://b/v/0.mp4".into()])))
            .await;

        let result = h.orchestrator.generate(USER, video()).await;
        assert!(matches!(result, OrchestrationResult::Succeeded { ref artifacts, .. } if artifacts.len() == 1));
        assert_eq!(h.media.poll_calls(), 2);
        assert_eq!(h.history.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_upstream_error_message_is_kept() {
        let h = harness(Duration::from_secs(1));
        h.media
            .push_submission(Err(MediaError::upstream(Some(429), "Quota exceeded")))
            .await;

        let result = h.orchestrator.generate(USER, image("a red bicycle", 1)).await;
        let OrchestrationResult::Failed { record_id: Some(id), kind, reason } = result else {
            panic!("expected failure");
        };
        assert_eq!(kind, FailureKind::External);
        assert_eq!(reason, "Quota exceeded");
        let record = h.history.get(USER, &id).await.unwrap();
        assert_eq!(record.error.as_deref(), Some("Quota exceeded"));
    }

    #[tokio::test]
    async fn test_no_record_is_left_pending() {
        let h = harness(Duration::from_millis(10));
        h.media
            .push_submission(Err(MediaError::Transient("connection reset".into())))
            .await;
        h.media
            .push_submission(Ok(Submission::Completed(vec![])))
            .await;
        h.media
            .push_submission(Ok(Submission::Running(handle("op-3"))))
            .await;

        for _ in 0..4 {
            h.orchestrator.generate(USER, video()).await;
        }
        assert_eq!(h.history.count().await, 4);
        assert_eq!(h.history.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_replay_uses_stored_params() {
        let h = harness(Duration::from_secs(1));
        let first = h.orchestrator.generate(USER, image("a blue kite", 3)).await;
        let source = first.record_id().unwrap().to_string();

        let replayed = h.orchestrator.replay(USER, &source).await.unwrap();
        let OrchestrationResult::Succeeded { record_id, artifacts } = replayed else {
            panic!("expected success");
        };
        assert_ne!(record_id, source);
        assert_eq!(artifacts.len(), 3);

        let original = h.history.get(USER, &source).await.unwrap();
        let copy = h.history.get(USER, &record_id).await.unwrap();
        assert_eq!(original.params, copy.params);

        assert!(matches!(
            h.orchestrator.replay("someone-else", &source).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resume_pending_finishes_tracked_operations() {
        let h = harness(Duration::from_secs(1));
        let request = GenerationRequest::from_raw(video()).unwrap();

        for _ in 0..3 {
            let id = h.history.append(NewRecord::new(USER, request.clone())).await.unwrap();
            h.history
                .track_operation(&PendingOperation {
                    record_id: id.clone(),
                    user_id: USER.into(),
                    handle: handle(&id),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        // Operations come back oldest first; answer one of each kind.
        let ops = h.history.pending_operations(USER).await.unwrap();
        assert_eq!(ops.len(), 3);
        h.media
            .push_poll(Ok(PollOutcome::Succeeded(vec!["gs://b/v/0.mp4".into()])))
            .await;
        h.media.push_poll(Ok(PollOutcome::Failed("filtered".into()))).await;
        h.media.push_poll(Ok(PollOutcome::Pending)).await;

        let summary = h.orchestrator.resume_pending(USER).await.unwrap();
        assert_eq!(summary.checked, 3);
        assert_eq!(summary.succeeded, vec![ops[0].record_id.clone()]);
        assert_eq!(summary.failed, vec![ops[1].record_id.clone()]);
        assert_eq!(summary.still_running, vec![ops[2].record_id.clone()]);

        let remaining = h.history.pending_operations(USER).await.unwrap();
        assert_eq!(remaining.len(), 1);
        let done = h.history.get(USER, &ops[0].record_id).await.unwrap();
        assert_eq!(done.status, RecordStatus::Succeeded);
        let failed = h.history.get(USER, &ops[1].record_id).await.unwrap();
        assert_eq!(failed.error.as_deref(), Some("filtered"));
    }

    #[tokio::test]
    async fn test_resume_leaves_records_pending_during_an_outage() {
        let h = harness(Duration::from_secs(1));
        let first = tracked_video(&h.history).await;
        let second = tracked_video(&h.history).await;
        h.media
            .push_poll(Err(MediaError::Transient("connection reset".into())))
            .await;
        h.media
            .push_poll(Err(MediaError::Auth("token expired".into())))
            .await;

        let mut summary = h.orchestrator.resume_pending(USER).await.unwrap();
        summary.unreachable.sort();
        let mut expected = vec![first.clone(), second.clone()];
        expected.sort();
        assert_eq!(summary.unreachable, expected);
        assert!(summary.failed.is_empty());

        for id in [&first, &second] {
            let record = h.history.get(USER, id).await.unwrap();
            assert_eq!(record.status, RecordStatus::Pending);
        }
        assert_eq!(h.history.pending_operations(USER).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resume_without_credentials_settles_nothing() {
        let history = Arc::new(MemoryHistoryStore::new());
        let media = VertexMediaClient::new(
            reqwest::Client::new(),
            Arc::new(FailingAuth),
            artifact_store(),
            "demo",
            "us-central1",
            RetryPolicy::immediate(0),
        );
        let orchestrator = Orchestrator::new(
            Arc::new(media),
            history.clone(),
            artifact_store(),
            poll_settings(Duration::from_secs(1)),
        );
        let id = tracked_video(&history).await;

        let summary = orchestrator.resume_pending(USER).await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.unreachable, vec![id.clone()]);
        assert!(summary.failed.is_empty());

        let record = history.get(USER, &id).await.unwrap();
        assert_eq!(record.status, RecordStatus::Pending);
        assert!(record.error.is_none());
        assert_eq!(history.pending_operations(USER).await.unwrap()[0].record_id, id);
    }

    #[tokio::test]
    async fn test_resume_fails_operations_that_no_longer_exist() {
        let h = harness(Duration::from_secs(1));
        let id = tracked_video(&h.history).await;
        h.media
            .push_poll(Err(MediaError::upstream(Some(404), "Operation not found")))
            .await;

        let summary = h.orchestrator.resume_pending(USER).await.unwrap();
        assert_eq!(summary.failed, vec![id.clone()]);

        let record = h.history.get(USER, &id).await.unwrap();
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(
            record.error.as_deref(),
            Some("operation no longer exists: Operation not found")
        );
        assert_eq!(h.history.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_resume_reports_records_settled_elsewhere() {
        let h = harness(Duration::from_secs(1));
        let id = tracked_video(&h.history).await;
        h.history
            .update_status(&id, &TerminalOutcome::Failed("timeout".into()))
            .await
            .unwrap();
        h.media
            .push_poll(Ok(PollOutcome::Succeeded(vec!["gs://b/v/0.mp4".into()])))
            .await;

        let summary = h.orchestrator.resume_pending(USER).await.unwrap();
        assert_eq!(summary.already_settled, vec![id.clone()]);
        assert!(summary.succeeded.is_empty());
        assert!(summary.failed.is_empty());

        let record = h.history.get(USER, &id).await.unwrap();
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(h.history.pending_count().await, 0);
    }

    #[test]
    fn test_result_serialization() {
        let result = OrchestrationResult::failed(None, FailureKind::Validation, "bad");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "validation");
        assert!(json.get("record_id").is_none());
    }
}
