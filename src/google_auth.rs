// src/google_auth.rs
//! OAuth access tokens for Vertex AI and Cloud Storage.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::MediaError;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh this long before the reported expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// gcloud does not report a lifetime; its tokens last an hour.
const GCLOUD_TOKEN_LIFETIME_SECS: i64 = 3000;

#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, MediaError>;
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Resolves a bearer token from, in order: a fixed `GOOGLE_ACCESS_TOKEN`, the
/// GCE / Cloud Run metadata server, then `gcloud auth print-access-token`.
pub struct GoogleAuth {
    client: Client,
    static_token: Option<String>,
    cache: Mutex<Option<CachedToken>>,
}

impl GoogleAuth {
    pub fn new(client: Client, static_token: Option<String>) -> Self {
        Self {
            client,
            static_token,
            cache: Mutex::new(None),
        }
    }

    async fn from_metadata_server(&self) -> Result<CachedToken, MediaError> {
        let response = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .timeout(std::time::Duration::from_secs(3))
            .send()
            .await
            .map_err(|e| MediaError::Auth(format!("metadata server unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(MediaError::Auth(format!(
                "metadata server returned {}",
                response.status()
            )));
        }

        let token: MetadataToken = response
            .json()
            .await
            .map_err(|e| MediaError::Auth(format!("bad metadata token payload: {}", e)))?;

        Ok(CachedToken {
            value: token.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
        })
    }

    async fn from_gcloud(&self) -> Result<CachedToken, MediaError> {
        let output = tokio::process::Command::new("gcloud")
            .args(["auth", "print-access-token"])
            .output()
            .await
            .map_err(|e| MediaError::Auth(format!("failed to run gcloud CLI: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::Auth(format!("gcloud auth failed: {}", stderr.trim())));
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if value.is_empty() {
            return Err(MediaError::Auth("gcloud returned an empty token".to_string()));
        }

        Ok(CachedToken {
            value,
            expires_at: Utc::now() + ChronoDuration::seconds(GCLOUD_TOKEN_LIFETIME_SECS),
        })
    }
}

#[async_trait]
impl AccessTokenProvider for GoogleAuth {
    async fn access_token(&self) -> Result<String, MediaError> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.expires_at - ChronoDuration::seconds(EXPIRY_MARGIN_SECS) > Utc::now() {
                return Ok(cached.value.clone());
            }
        }

        let fresh = match self.from_metadata_server().await {
            Ok(token) => token,
            Err(metadata_err) => {
                tracing::debug!("metadata token unavailable ({}), falling back to gcloud", metadata_err);
                self.from_gcloud().await?
            }
        };

        tracing::debug!(expires_at = %fresh.expires_at, "🔑 refreshed Google access token");
        let value = fresh.value.clone();
        *cache = Some(fresh);
        Ok(value)
    }
}

/// Fixed token, for tests and local runs.
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, MediaError> {
        Ok(self.0.clone())
    }
}
