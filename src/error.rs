// src/error.rs
//! Error taxonomy shared by the media client, the history store and the HTTP layer.

use std::time::Duration;
use thiserror::Error;

use crate::models::generation::Modality;
use crate::models::history::RecordStatus;

/// Bad or missing parameters. Raised locally, never reaches an external service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("unknown modality '{0}'")]
    UnknownModality(String),
    #[error("missing required parameter '{param}' for {modality}")]
    Missing {
        param: &'static str,
        modality: Modality,
    },
    #[error("parameter '{param}' is not supported for {modality}")]
    NotApplicable {
        param: &'static str,
        modality: Modality,
    },
    #[error("invalid value for '{param}': {reason}")]
    Invalid { param: &'static str, reason: String },
}

impl ValidationError {
    pub fn invalid(param: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::Invalid {
            param,
            reason: reason.into(),
        }
    }
}

/// Failures from the hosted model endpoints and from artifact storage.
#[derive(Error, Debug, Clone)]
pub enum MediaError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Quota, permission or malformed-response errors. The reason is the upstream message.
    #[error("{reason}")]
    Upstream { status: Option<u16>, reason: String },

    /// Network-level failure or a 5xx answer; eligible for retry.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("operation did not finish within {0:?}")]
    Timeout(Duration),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("artifact storage failed: {0}")]
    Storage(String),
}

impl MediaError {
    pub fn upstream(status: Option<u16>, reason: impl Into<String>) -> Self {
        MediaError::Upstream {
            status,
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, MediaError::Transient(_))
    }

    /// The service, the token source or the artifact bucket could not be
    /// reached. Says nothing about the remote operation itself.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            MediaError::Transient(_) | MediaError::Auth(_) | MediaError::Storage(_)
        )
    }
}

impl From<reqwest::Error> for MediaError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() {
            MediaError::Transient(e.to_string())
        } else if e.is_decode() {
            MediaError::upstream(None, format!("malformed upstream response: {}", e))
        } else {
            MediaError::upstream(e.status().map(|s| s.as_u16()), e.to_string())
        }
    }
}

/// Failures of the history document store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store unreachable; retried a bounded number of times before surfacing.
    #[error("history store unavailable: {0}")]
    Unavailable(String),

    /// Write refused by the store itself.
    #[error("history store rejected the write: {0}")]
    Rejected(String),

    /// Caller handed over a record that violates the record contract.
    #[error("malformed history record: {0}")]
    InvalidRecord(String),

    #[error("history record {0} not found")]
    NotFound(String),

    #[error("record {id} is already {current}, refusing to mark it {attempted}")]
    Conflict {
        id: String,
        current: RecordStatus,
        attempted: RecordStatus,
    },

    #[error("invalid page token")]
    InvalidPageToken,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            other => StoreError::Rejected(other.to_string()),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}
