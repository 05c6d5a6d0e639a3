// src/history/postgres.rs
//! History kept in Postgres: one row per generation, parameters as JSONB.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{check_repeat, HistoryStore};
use crate::config::RetryPolicy;
use crate::error::StoreError;
use crate::models::history::{
    GenerationRecord, HistoryPage, NewRecord, PageToken, PendingOperation, RecordId, TerminalOutcome,
    PAGE_SIZE,
};
use crate::retry::with_backoff;

const RECORD_COLUMNS: &str =
    "id, user_id, modality, params, artifacts, status, created_at, completed_at, error";

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: String,
    user_id: String,
    modality: String,
    params: serde_json::Value,
    artifacts: Vec<String>,
    status: String,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl TryFrom<HistoryRow> for GenerationRecord {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(GenerationRecord {
            modality: row
                .modality
                .parse()
                .map_err(|e: crate::error::ValidationError| StoreError::InvalidRecord(e.to_string()))?,
            params: serde_json::from_value(row.params)?,
            status: row.status.parse()?,
            id: row.id,
            user_id: row.user_id,
            artifacts: row.artifacts,
            created_at: row.created_at,
            completed_at: row.completed_at,
            error: row.error,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OperationRow {
    record_id: String,
    user_id: String,
    handle: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<OperationRow> for PendingOperation {
    type Error = StoreError;

    fn try_from(row: OperationRow) -> Result<Self, Self::Error> {
        Ok(PendingOperation {
            record_id: row.record_id,
            user_id: row.user_id,
            handle: serde_json::from_value(row.handle)?,
            created_at: row.created_at,
        })
    }
}

pub struct PostgresHistoryStore {
    pool: PgPool,
    retry: RetryPolicy,
}

impl PostgresHistoryStore {
    pub fn new(pool: PgPool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }

    async fn insert_once(&self, record: &GenerationRecord, params: &serde_json::Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO generation_history
            (id, user_id, modality, params, artifacts, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(record.modality.as_str())
        .bind(params)
        .bind(&record.artifacts)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_once(&self, id: &str, outcome: &TerminalOutcome) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE generation_history
            SET status = $2, artifacts = $3, error = $4, completed_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(outcome.status().as_str())
        .bind(outcome.artifacts())
        .bind(outcome.error())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Option<GenerationRecord>, StoreError> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {} FROM generation_history WHERE id = $1",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(GenerationRecord::try_from).transpose()
    }

    async fn page_once(
        &self,
        user_id: &str,
        cursor: Option<&PageToken>,
    ) -> Result<Vec<HistoryRow>, StoreError> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            r#"
            SELECT {}
            FROM generation_history
            WHERE user_id = $1
              AND ($2::timestamptz IS NULL OR (created_at, id) < ($2, $3))
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#,
            RECORD_COLUMNS
        ))
        .bind(user_id)
        .bind(cursor.map(|c| c.created_at))
        .bind(cursor.map(|c| c.id.as_str()))
        .bind((PAGE_SIZE + 1) as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_once(&self, user_id: &str, id: &str) -> Result<Option<HistoryRow>, StoreError> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {} FROM generation_history WHERE id = $1 AND user_id = $2",
            RECORD_COLUMNS
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn track_once(&self, op: &PendingOperation, handle: &serde_json::Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO pending_operations (record_id, user_id, handle, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (record_id) DO UPDATE SET handle = EXCLUDED.handle
            "#,
        )
        .bind(&op.record_id)
        .bind(&op.user_id)
        .bind(handle)
        .bind(op.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn operations_once(&self, user_id: &str) -> Result<Vec<OperationRow>, StoreError> {
        let rows = sqlx::query_as::<_, OperationRow>(
            r#"
            SELECT record_id, user_id, handle, created_at
            FROM pending_operations
            WHERE user_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn clear_once(&self, record_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pending_operations WHERE record_id = $1")
            .bind(record_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    async fn append(&self, record: NewRecord) -> Result<RecordId, StoreError> {
        record.validate()?;
        let record = record.into_pending(Utc::now());
        let params = serde_json::to_value(&record.params)?;

        // Retries reuse the same id, so a lost acknowledgement cannot duplicate the row.
        with_backoff(&self.retry, "history append", || self.insert_once(&record, &params)).await?;

        tracing::info!(record_id = %record.id, user_id = %record.user_id, modality = %record.modality, "📝 history record created");
        Ok(record.id)
    }

    async fn update_status(&self, id: &str, outcome: &TerminalOutcome) -> Result<(), StoreError> {
        let updated =
            with_backoff(&self.retry, "history update", || self.complete_once(id, outcome)).await?;
        if updated > 0 {
            tracing::info!(record_id = %id, status = %outcome.status(), "history record completed");
            return Ok(());
        }

        let current = with_backoff(&self.retry, "history lookup", || self.fetch_by_id(id))
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        check_repeat(&current, outcome)
    }

    async fn list_page(&self, user_id: &str, page_token: Option<&str>) -> Result<HistoryPage, StoreError> {
        let cursor = page_token.map(PageToken::decode).transpose()?;
        let rows = with_backoff(&self.retry, "history page", || {
            self.page_once(user_id, cursor.as_ref())
        })
        .await?;

        let has_more = rows.len() > PAGE_SIZE;
        let records = rows
            .into_iter()
            .take(PAGE_SIZE)
            .map(GenerationRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let next_page_token = if has_more {
            records.last().map(|r| PageToken::after(r).encode())
        } else {
            None
        };

        Ok(HistoryPage {
            records,
            next_page_token,
        })
    }

    async fn get(&self, user_id: &str, id: &str) -> Result<GenerationRecord, StoreError> {
        let row = with_backoff(&self.retry, "history get", || self.get_once(user_id, id))
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        GenerationRecord::try_from(row)
    }

    async fn track_operation(&self, operation: &PendingOperation) -> Result<(), StoreError> {
        let handle = serde_json::to_value(&operation.handle)?;
        with_backoff(&self.retry, "track operation", || self.track_once(operation, &handle)).await
    }

    async fn pending_operations(&self, user_id: &str) -> Result<Vec<PendingOperation>, StoreError> {
        with_backoff(&self.retry, "pending operations", || self.operations_once(user_id))
            .await?
            .into_iter()
            .map(PendingOperation::try_from)
            .collect()
    }

    async fn clear_operation(&self, record_id: &str) -> Result<(), StoreError> {
        with_backoff(&self.retry, "clear operation", || self.clear_once(record_id)).await
    }
}
