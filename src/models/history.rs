// src/models/history.rs
//! History record types and the keyset page token.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;
use crate::media::OperationHandle;
use crate::models::generation::{GenerationRequest, Modality};

/// Records per history page.
pub const PAGE_SIZE: usize = 10;

pub type RecordId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Succeeded,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Succeeded => "succeeded",
            RecordStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordStatus::Pending)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecordStatus::Pending),
            "succeeded" => Ok(RecordStatus::Succeeded),
            "failed" => Ok(RecordStatus::Failed),
            other => Err(StoreError::InvalidRecord(format!("unknown status '{}'", other))),
        }
    }
}

/// One generation attempt as persisted in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub id: RecordId,
    pub user_id: String,
    pub modality: Modality,
    pub params: GenerationRequest,
    pub artifacts: Vec<String>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What callers hand to `append`. The store assigns id, status and timestamps.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub user_id: String,
    pub params: GenerationRequest,
}

impl NewRecord {
    pub fn new(user_id: impl Into<String>, params: GenerationRequest) -> Self {
        Self {
            user_id: user_id.into(),
            params,
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.user_id.trim().is_empty() {
            return Err(StoreError::InvalidRecord("user id is empty".to_string()));
        }
        self.params
            .validate()
            .map_err(|e| StoreError::InvalidRecord(e.to_string()))
    }

    /// Materializes the pending record. `created_at` is truncated to
    /// microseconds so it survives a round trip through Postgres unchanged.
    pub fn into_pending(self, now: DateTime<Utc>) -> GenerationRecord {
        GenerationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: self.user_id,
            modality: self.params.modality,
            params: self.params,
            artifacts: Vec::new(),
            status: RecordStatus::Pending,
            created_at: now.trunc_subsecs(6),
            completed_at: None,
            error: None,
        }
    }
}

/// The single terminal transition a pending record may take.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Succeeded(Vec<String>),
    Failed(String),
}

impl TerminalOutcome {
    pub fn status(&self) -> RecordStatus {
        match self {
            TerminalOutcome::Succeeded(_) => RecordStatus::Succeeded,
            TerminalOutcome::Failed(_) => RecordStatus::Failed,
        }
    }

    pub fn artifacts(&self) -> &[String] {
        match self {
            TerminalOutcome::Succeeded(uris) => uris,
            TerminalOutcome::Failed(_) => &[],
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            TerminalOutcome::Succeeded(_) => None,
            TerminalOutcome::Failed(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub records: Vec<GenerationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Keyset cursor: the `(created_at, id)` of the last record on the previous page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageToken {
    pub created_at: DateTime<Utc>,
    pub id: RecordId,
}

impl PageToken {
    pub fn after(record: &GenerationRecord) -> Self {
        Self {
            created_at: record.created_at,
            id: record.id.clone(),
        }
    }

    pub fn encode(&self) -> String {
        let raw = format!("{}:{}", self.created_at.timestamp_micros(), self.id);
        URL_SAFE_NO_PAD.encode(raw.as_bytes())
    }

    pub fn decode(token: &str) -> Result<Self, StoreError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| StoreError::InvalidPageToken)?;
        let raw = String::from_utf8(bytes).map_err(|_| StoreError::InvalidPageToken)?;
        let (micros, id) = raw.split_once(':').ok_or(StoreError::InvalidPageToken)?;
        let micros: i64 = micros.parse().map_err(|_| StoreError::InvalidPageToken)?;
        if id.is_empty() {
            return Err(StoreError::InvalidPageToken);
        }
        let created_at = Utc
            .timestamp_micros(micros)
            .single()
            .ok_or(StoreError::InvalidPageToken)?;
        Ok(Self {
            created_at,
            id: id.to_string(),
        })
    }

    /// True when `record` sorts strictly after this cursor in newest-first order.
    pub fn precedes(&self, record: &GenerationRecord) -> bool {
        (record.created_at, record.id.as_str()) < (self.created_at, self.id.as_str())
    }
}

/// A submitted long-running operation whose record is still pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub record_id: RecordId,
    pub user_id: String,
    pub handle: OperationHandle,
    pub created_at: DateTime<Utc>,
}
