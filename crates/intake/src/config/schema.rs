use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::secrets::{SecretError, TokenSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeConfig {
    pub version: String,
    pub api: ApiConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Base URL of the ingestion API (`/storage/upload`, `/files`, ...).
    pub base_url: String,

    /// Base URL of the event-stream relay. Defaults to `base_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env_var: Option<String>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Applies to request/response calls only. The event stream is long-lived.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ApiConfig {
    pub fn events_base_url(&self) -> &str {
        self.events_url.as_deref().unwrap_or(&self.base_url)
    }

    pub fn token_source(&self) -> TokenSource<'_> {
        TokenSource {
            value: self.token.as_deref(),
            file: self.token_file.as_deref(),
            env_var: self.token_env_var.as_deref(),
        }
    }

    /// Resolves the bearer token; `None` means unauthenticated.
    pub fn resolve_token(&self) -> Result<Option<SecretString>, SecretError> {
        self.token_source().resolve()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    /// Upper bound on pipelines running the upload/create/trigger stages at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Folder every created record is filed under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<i64>,

    /// Capacity of the live-view broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Fail items that stay in `processing` longer than this. Unset means wait forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_timeout_secs: Option<u64>,
}

impl QueueConfig {
    /// Never zero, even when the config was built by hand.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn processing_timeout(&self) -> Option<Duration> {
        self.processing_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            poll_interval_ms: default_poll_interval_ms(),
            folder_id: None,
            event_capacity: default_event_capacity(),
            processing_timeout_secs: None,
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    120
}

/// Core count, clamped to 4..=16.
fn default_max_concurrent() -> usize {
    num_cpus::get().clamp(4, 16)
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_event_capacity() -> usize {
    256
}
