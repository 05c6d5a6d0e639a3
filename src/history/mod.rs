// src/history/mod.rs
//! Per-user generation history.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::history::{
    GenerationRecord, HistoryPage, NewRecord, PendingOperation, RecordId, TerminalOutcome,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryHistoryStore;
pub use postgres::PostgresHistoryStore;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Writes a new `pending` record and returns its id.
    async fn append(&self, record: NewRecord) -> Result<RecordId, StoreError>;

    /// Moves a pending record to its terminal state. Repeating the same
    /// terminal status is a no-op; switching to the other one is a conflict.
    async fn update_status(&self, id: &str, outcome: &TerminalOutcome) -> Result<(), StoreError>;

    /// Up to `PAGE_SIZE` records of `user_id`, newest first.
    async fn list_page(&self, user_id: &str, page_token: Option<&str>) -> Result<HistoryPage, StoreError>;

    async fn get(&self, user_id: &str, id: &str) -> Result<GenerationRecord, StoreError>;

    async fn track_operation(&self, operation: &PendingOperation) -> Result<(), StoreError>;

    async fn pending_operations(&self, user_id: &str) -> Result<Vec<PendingOperation>, StoreError>;

    async fn clear_operation(&self, record_id: &str) -> Result<(), StoreError>;
}

/// Shared by both stores: why a terminal write on a non-pending record was refused.
pub(crate) fn check_repeat(
    record: &GenerationRecord,
    outcome: &TerminalOutcome,
) -> Result<(), StoreError> {
    if record.status == outcome.status() {
        tracing::debug!(record_id = %record.id, status = %record.status, "terminal status already recorded");
        Ok(())
    } else {
        Err(StoreError::Conflict {
            id: record.id.clone(),
            current: record.status,
            attempted: outcome.status(),
        })
    }
}
