// src/history/memory.rs
//! In-process history store for tests and local development.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{check_repeat, HistoryStore};
use crate::error::StoreError;
use crate::models::history::{
    GenerationRecord, HistoryPage, NewRecord, PageToken, PendingOperation, RecordId, RecordStatus,
    TerminalOutcome, PAGE_SIZE,
};

#[derive(Default)]
pub struct MemoryHistoryStore {
    records: RwLock<HashMap<RecordId, GenerationRecord>>,
    operations: RwLock<HashMap<RecordId, PendingOperation>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fully formed record. Lets tests control `created_at`.
    pub async fn insert_raw(&self, record: GenerationRecord) {
        self.records.write().await.insert(record.id.clone(), record);
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, record: NewRecord) -> Result<RecordId, StoreError> {
        record.validate()?;
        let record = record.into_pending(Utc::now());
        let id = record.id.clone();
        self.records.write().await.insert(id.clone(), record);
        Ok(id)
    }

    async fn update_status(&self, id: &str, outcome: &TerminalOutcome) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if record.status.is_terminal() {
            return check_repeat(record, outcome);
        }

        record.status = outcome.status();
        record.artifacts = outcome.artifacts().to_vec();
        record.error = outcome.error().map(str::to_string);
        record.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn list_page(&self, user_id: &str, page_token: Option<&str>) -> Result<HistoryPage, StoreError> {
        let cursor = page_token.map(PageToken::decode).transpose()?;
        let records = self.records.read().await;

        let mut mine: Vec<&GenerationRecord> = records
            .values()
            .filter(|r| r.user_id == user_id)
            .filter(|r| cursor.as_ref().map_or(true, |c| c.precedes(r)))
            .collect();
        mine.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));

        let has_more = mine.len() > PAGE_SIZE;
        let page: Vec<GenerationRecord> = mine.into_iter().take(PAGE_SIZE).cloned().collect();
        let next_page_token = if has_more {
            page.last().map(|r| PageToken::after(r).encode())
        } else {
            None
        };

        Ok(HistoryPage {
            records: page,
            next_page_token,
        })
    }

    async fn get(&self, user_id: &str, id: &str) -> Result<GenerationRecord, StoreError> {
        self.records
            .read()
            .await
            .get(id)
            .filter(|r| r.user_id == user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn track_operation(&self, operation: &PendingOperation) -> Result<(), StoreError> {
        self.operations
            .write()
            .await
            .insert(operation.record_id.clone(), operation.clone());
        Ok(())
    }

    async fn pending_operations(&self, user_id: &str) -> Result<Vec<PendingOperation>, StoreError> {
        let mut ops: Vec<PendingOperation> = self
            .operations
            .read()
            .await
            .values()
            .filter(|op| op.user_id == user_id)
            .cloned()
            .collect();
        ops.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(ops)
    }

    async fn clear_operation(&self, record_id: &str) -> Result<(), StoreError> {
        self.operations.write().await.remove(record_id);
        Ok(())
    }
}

impl MemoryHistoryStore {
    /// Records still waiting for a terminal status.
    pub async fn pending_count(&self) -> usize {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.status == RecordStatus::Pending)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::OperationHandle;
    use crate::models::generation::{GenerationRequest, Modality, RawParams};
    use chrono::{Duration, TimeZone};
    use std::collections::HashSet;

    fn image_request() -> GenerationRequest {
        GenerationRequest::from_raw(RawParams {
            modality: Some("text-to-image".into()),
            prompt: Some("a red bicycle".into()),
            ..Default::default()
        })
        .unwrap()
    }

    async fn seeded(store: &MemoryHistoryStore, user: &str, count: usize) {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        for i in 0..count {
            let mut record = NewRecord::new(user, image_request()).into_pending(base);
            record.created_at = base + Duration::seconds(i as i64);
            store.insert_raw(record).await;
        }
    }

    #[tokio::test]
    async fn test_append_starts_pending() {
        let store = MemoryHistoryStore::new();
        let id = store.append(NewRecord::new("ana@example.com", image_request())).await.unwrap();

        let record = store.get("ana@example.com", &id).await.unwrap();
        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(record.modality, Modality::TextToImage);
        assert!(record.artifacts.is_empty());
        assert!(record.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_append_rejects_empty_user() {
        let store = MemoryHistoryStore::new();
        let err = store.append(NewRecord::new("  ", image_request())).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_terminal_update_is_idempotent() {
        let store = MemoryHistoryStore::new();
        let id = store.append(NewRecord::new("ana", image_request())).await.unwrap();
        let done = TerminalOutcome::Succeeded(vec!["gs://b/0.png".into()]);

        store.update_status(&id, &done).await.unwrap();
        let first = store.get("ana", &id).await.unwrap();

        store
            .update_status(&id, &TerminalOutcome::Succeeded(vec!["gs://b/other.png".into()]))
            .await
            .unwrap();
        let second = store.get("ana", &id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.artifacts, vec!["gs://b/0.png".to_string()]);
    }

    #[tokio::test]
    async fn test_conflicting_terminal_update_is_refused() {
        let store = MemoryHistoryStore::new();
        let id = store.append(NewRecord::new("ana", image_request())).await.unwrap();
        store.update_status(&id, &TerminalOutcome::Failed("timeout".into())).await.unwrap();

        let err = store
            .update_status(&id, &TerminalOutcome::Succeeded(vec!["gs://b/0.png".into()]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                current: RecordStatus::Failed,
                attempted: RecordStatus::Succeeded,
                ..
            }
        ));
        let record = store.get("ana", &id).await.unwrap();
        assert_eq!(record.error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_update_unknown_record() {
        let store = MemoryHistoryStore::new();
        let err = store
            .update_status("missing", &TerminalOutcome::Failed("x".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_pages_of_ten_newest_first() {
        let store = MemoryHistoryStore::new();
        seeded(&store, "ana", 25).await;

        let first = store.list_page("ana", None).await.unwrap();
        assert_eq!(first.records.len(), 10);
        assert!(first
            .records
            .windows(2)
            .all(|w| w[0].created_at > w[1].created_at));

        let second = store
            .list_page("ana", first.next_page_token.as_deref())
            .await
            .unwrap();
        assert_eq!(second.records.len(), 10);
        assert!(second.records[0].created_at < first.records[9].created_at);

        let third = store
            .list_page("ana", second.next_page_token.as_deref())
            .await
            .unwrap();
        assert_eq!(third.records.len(), 5);
        assert!(third.next_page_token.is_none());

        let ids: HashSet<String> = first
            .records
            .iter()
            .chain(&second.records)
            .chain(&third.records)
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(ids.len(), 25);
    }

    #[tokio::test]
    async fn test_same_token_gives_same_page() {
        let store = MemoryHistoryStore::new();
        seeded(&store, "ana", 15).await;
        let token = store.list_page("ana", None).await.unwrap().next_page_token;

        let a = store.list_page("ana", token.as_deref()).await.unwrap();
        let b = store.list_page("ana", token.as_deref()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.records.len(), 5);
    }

    #[tokio::test]
    async fn test_records_with_equal_timestamps_are_not_skipped() {
        let store = MemoryHistoryStore::new();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        for _ in 0..12 {
            store
                .insert_raw(NewRecord::new("ana", image_request()).into_pending(at))
                .await;
        }
        let first = store.list_page("ana", None).await.unwrap();
        let second = store
            .list_page("ana", first.next_page_token.as_deref())
            .await
            .unwrap();
        assert_eq!(first.records.len() + second.records.len(), 12);
    }

    #[tokio::test]
    async fn test_users_only_see_their_own_history() {
        let store = MemoryHistoryStore::new();
        seeded(&store, "ana", 3).await;
        seeded(&store, "ben", 4).await;

        let page = store.list_page("ben", None).await.unwrap();
        assert_eq!(page.records.len(), 4);
        assert!(page.records.iter().all(|r| r.user_id == "ben"));

        let ana_id = store.list_page("ana", None).await.unwrap().records[0].id.clone();
        assert!(matches!(store.get("ben", &ana_id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_empty_history_and_bad_token() {
        let store = MemoryHistoryStore::new();
        let page = store.list_page("nobody", None).await.unwrap();
        assert!(page.records.is_empty());
        assert!(page.next_page_token.is_none());

        assert!(matches!(
            store.list_page("nobody", Some("not a token")).await,
            Err(StoreError::InvalidPageToken)
        ));
    }

    #[tokio::test]
    async fn test_params_round_trip_for_replay() {
        let store = MemoryHistoryStore::new();
        let request = image_request();
        let id = store.append(NewRecord::new("ana", request.clone())).await.unwrap();
        let stored = store.get("ana", &id).await.unwrap();
        assert_eq!(stored.params, request);
    }

    #[tokio::test]
    async fn test_operation_tracking() {
        let store = MemoryHistoryStore::new();
        let op = PendingOperation {
            record_id: "r1".into(),
            user_id: "ana".into(),
            handle: OperationHandle {
                name: "operations/1".into(),
                model: "veo-3.1-generate-preview".into(),
                modality: Modality::TextToVideo,
                request_id: "r1".into(),
            },
            created_at: Utc::now(),
        };
        store.track_operation(&op).await.unwrap();
        assert_eq!(store.pending_operations("ana").await.unwrap(), vec![op]);
        assert!(store.pending_operations("ben").await.unwrap().is_empty());

        store.clear_operation("r1").await.unwrap();
        assert!(store.pending_operations("ana").await.unwrap().is_empty());
    }
}
