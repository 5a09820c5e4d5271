//! Upload item data model.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IntakeError;
use crate::sanitize;

/// Backend identifier of a created file record.
pub type FileId = i64;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Local lifecycle of an item.
///
/// Items move strictly along `queued → uploading → creating → processing →
/// completed`; `failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Queued,
    Uploading,
    Creating,
    Processing,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }

    /// Returns true if `next` is the single legal successor of `self`,
    /// or `next` is `Failed` and `self` is not terminal.
    pub fn can_advance_to(self, next: ItemStatus) -> bool {
        use ItemStatus::*;

        match (self, next) {
            (Queued, Uploading)
            | (Uploading, Creating)
            | (Creating, Processing)
            | (Processing, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Queued => "queued",
            ItemStatus::Uploading => "uploading",
            ItemStatus::Creating => "creating",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing state as reported by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteStatus::Pending => write!(f, "pending"),
            RemoteStatus::Processing => write!(f, "processing"),
            RemoteStatus::Completed => write!(f, "completed"),
            RemoteStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Step kind carried by push-channel events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStep {
    Connected,
    Status,
    ToolCall,
    ToolResult,
    Result,
    Error,
    Done,
}

impl AgentStep {
    /// `done` and `error` end the item; everything else is advisory.
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentStep::Done | AgentStep::Error)
    }
}

/// Where the bytes of a source file live.
#[derive(Clone)]
pub enum SourceContent {
    Path(PathBuf),
    Memory(Arc<[u8]>),
}

impl std::fmt::Debug for SourceContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceContent::Path(path) => f.debug_tuple("Path").field(path).finish(),
            SourceContent::Memory(bytes) => write!(f, "Memory({} bytes)", bytes.len()),
        }
    }
}

/// The raw input handle of an item. Immutable after creation.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub content: SourceContent,
}

impl SourceFile {
    /// Builds a file-backed source, reading size from metadata and guessing the
    /// content type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, IntakeError> {
        let path = path.as_ref();
        let metadata =
            tokio::fs::metadata(path)
                .await
                .map_err(|e| IntakeError::SourceFile {
                    path: path.to_path_buf(),
                    source: e,
                })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Self {
            mime_type: guess_mime_type(&name),
            name,
            size: metadata.len(),
            content: SourceContent::Path(path.to_path_buf()),
        })
    }

    /// Builds an in-memory source. The content type is guessed when not given.
    pub fn from_bytes(name: &str, bytes: impl Into<Arc<[u8]>>, mime_type: Option<&str>) -> Self {
        let bytes: Arc<[u8]> = bytes.into();
        Self {
            name: name.to_string(),
            size: bytes.len() as u64,
            mime_type: mime_type
                .map(|m| m.to_string())
                .unwrap_or_else(|| guess_mime_type(name)),
            content: SourceContent::Memory(bytes),
        }
    }

    /// The name as it may appear in logs and spans, without any directory part.
    pub fn log_name(&self) -> String {
        sanitize::redact_path(Path::new(&self.name))
    }

    /// Reads the full content. File-backed sources are re-read on every call,
    /// so a retry always uploads the current bytes from scratch.
    pub async fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        match &self.content {
            SourceContent::Path(path) => tokio::fs::read(path).await,
            SourceContent::Memory(bytes) => Ok(bytes.to_vec()),
        }
    }
}

fn guess_mime_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string()
}

/// One submitted file and everything known about its ingestion.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub id: String,
    pub source: SourceFile,
    pub status: ItemStatus,
    /// 0-100, never decreases within one attempt.
    pub progress: u8,
    /// Pipeline run number; bumped on every retry so stale writers are ignored.
    pub attempt: u32,
    pub storage_key: Option<String>,
    pub backend_file_id: Option<FileId>,
    pub remote_status: Option<RemoteStatus>,
    pub result_summary: Option<String>,
    pub last_error: Option<String>,
    pub live_agent_message: Option<String>,
    pub live_agent_step: Option<AgentStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadItem {
    pub fn new(source: SourceFile) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            status: ItemStatus::Queued,
            progress: 0,
            attempt: 1,
            storage_key: None,
            backend_file_id: None,
            remote_status: None,
            result_summary: None,
            last_error: None,
            live_agent_message: None,
            live_agent_step: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Puts a failed item back to the start of the pipeline under a new attempt.
    pub(crate) fn reset_for_retry(&mut self) {
        self.status = ItemStatus::Queued;
        self.progress = 0;
        self.attempt += 1;
        self.storage_key = None;
        self.backend_file_id = None;
        self.remote_status = None;
        self.result_summary = None;
        self.last_error = None;
        self.live_agent_message = None;
        self.live_agent_step = None;
        self.updated_at = Utc::now();
    }

    /// Human-readable status line for list rendering.
    pub fn display_text(&self) -> String {
        match self.status {
            ItemStatus::Queued => "Waiting to upload".to_string(),
            ItemStatus::Uploading => "Uploading".to_string(),
            ItemStatus::Creating => "Registering file".to_string(),
            ItemStatus::Processing => match (&self.live_agent_message, self.remote_status) {
                (Some(message), _) if !message.is_empty() => message.clone(),
                (_, Some(RemoteStatus::Pending)) => "Processing (pending)".to_string(),
                _ => "Processing".to_string(),
            },
            ItemStatus::Completed => self
                .result_summary
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "Completed".to_string()),
            ItemStatus::Failed => format!(
                "Failed: {}",
                self.last_error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}
