// src/config.rs
//! Process configuration, read once at startup and passed to constructors.

use backoff::ExponentialBackoff;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// `gs://bucket[/prefix]` root under which every artifact is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    pub bucket: String,
    pub prefix: String,
}

impl StorageLocation {
    pub fn parse(uri: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            name: "STORAGE_URI",
            reason: reason.to_string(),
        };
        let rest = uri
            .trim()
            .strip_prefix("gs://")
            .ok_or_else(|| invalid("expected a gs:// URI"))?;
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(invalid("bucket name is empty"));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        })
    }

    /// Joins `path` onto the configured prefix, without the bucket.
    pub fn object_name(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.prefix, path)
        }
    }

    pub fn uri_for(&self, path: &str) -> String {
        format!("gs://{}/{}", self.bucket, self.object_name(path))
    }
}

/// Bounded exponential backoff for one class of dependency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(8),
        }
    }

    /// No waiting between attempts. Tests use this.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(1),
        }
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: 2.0,
            randomization_factor: 0.2,
            // The attempt counter bounds retries; elapsed time does not.
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub project_id: String,
    pub location: String,
    pub storage: StorageLocation,
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub default_user_id: Option<String>,
    pub poll: PollSettings,
    pub media_retry: RetryPolicy,
    pub store_retry: RetryPolicy,
    pub http_timeout: Duration,
    pub static_access_token: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let project_id = get("PROJECT_ID").ok_or(ConfigError::Missing("PROJECT_ID"))?;
        let storage_uri = get("STORAGE_URI").ok_or(ConfigError::Missing("STORAGE_URI"))?;

        Ok(Self {
            project_id,
            location: get("LOCATION").unwrap_or_else(|| "us-central1".to_string()),
            storage: StorageLocation::parse(&storage_uri)?,
            database_url: get("DATABASE_URL"),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            default_user_id: get("DEFAULT_USER_ID"),
            poll: PollSettings {
                interval: Duration::from_secs(number(&get, "POLL_INTERVAL_SECS", 10)?),
                timeout: Duration::from_secs(number(&get, "POLL_TIMEOUT_SECS", 600)?),
            },
            media_retry: RetryPolicy::new(number(&get, "MEDIA_MAX_RETRIES", 3)?),
            store_retry: RetryPolicy::new(number(&get, "STORE_MAX_RETRIES", 3)?),
            http_timeout: Duration::from_secs(number(&get, "HTTP_TIMEOUT_SECS", 120)?),
            static_access_token: get("GOOGLE_ACCESS_TOKEN"),
        })
    }
}

/// Out-of-range values are rejected, never truncated.
fn number<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            reason: format!("'{}' is not a non-negative integer in range", raw),
        }),
    }
}
