//! Collaborators consumed by the ingestion pipeline.
//!
//! [`IngestBackend`] covers the request/response calls (upload, record
//! creation, processing trigger, status lookup) and [`EventSource`] the
//! per-file push channel. [`HttpBackend`] implements both over HTTP.

pub mod http;
pub mod sse;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::item::{AgentStep, FileId, RemoteStatus, SourceFile};

pub use http::HttpBackend;
pub use sse::{decode_event_stream, SseDecoder};

/// Errors raised by backend collaborators.
///
/// `Transport` displays the underlying message verbatim, since that text is
/// what ends up in a failed item's `last_error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("{0}")]
    Transport(String),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Failed to read source file: {0}")]
    Source(String),

    #[error("Event stream error: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

/// Result of a blob upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    #[serde(rename = "key")]
    pub storage_key: String,
}

/// Metadata registered for uploaded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordRequest {
    pub title: String,
    pub storage_key: String,
    pub original_filename: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<i64>,
}

impl CreateRecordRequest {
    pub fn for_source(source: &SourceFile, storage_key: &str, folder_id: Option<i64>) -> Self {
        Self {
            title: source.name.clone(),
            storage_key: storage_key.to_string(),
            original_filename: source.name.clone(),
            mime_type: source.mime_type.clone(),
            size: source.size,
            folder_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHandle {
    #[serde(rename = "id")]
    pub file_id: FileId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerReceipt {
    pub status: String,
}

/// A file record as returned by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub processing_status: RemoteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, rename = "processingError", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RemoteRecord {
    pub fn with_status(processing_status: RemoteStatus) -> Self {
        Self {
            processing_status,
            summary: None,
            error: None,
        }
    }
}

/// One push-channel message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub step: AgentStep,
    #[serde(default)]
    pub message: String,
    /// Tool name, present on `tool_call` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

impl AgentEvent {
    pub fn new(step: AgentStep, message: &str) -> Self {
        Self {
            step,
            message: message.to_string(),
            tool: None,
        }
    }

    /// Message shown in the live view; tool calls name their tool.
    pub fn display_message(&self) -> String {
        match (&self.step, &self.tool) {
            (AgentStep::ToolCall, Some(tool)) if self.message.is_empty() => {
                format!("Running {}", tool)
            }
            (AgentStep::ToolCall, Some(tool)) => format!("{} ({})", self.message, tool),
            _ => self.message.clone(),
        }
    }
}

/// Push-channel subscription: a stream of agent events that ends when the
/// server closes it or the transport fails.
pub type AgentEventStream = BoxStream<'static, Result<AgentEvent, BackendError>>;

/// Request/response operations against the ingestion backend.
#[async_trait]
pub trait IngestBackend: Send + Sync {
    async fn upload_blob(&self, file: &SourceFile) -> Result<UploadReceipt, BackendError>;

    async fn create_record(
        &self,
        request: &CreateRecordRequest,
    ) -> Result<RecordHandle, BackendError>;

    async fn trigger_processing(&self, file_id: FileId) -> Result<TriggerReceipt, BackendError>;

    async fn get_record(&self, file_id: FileId) -> Result<RemoteRecord, BackendError>;
}

/// Per-file server push subscription.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn subscribe(&self, file_id: FileId) -> Result<AgentEventStream, BackendError>;
}
