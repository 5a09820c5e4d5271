pub mod backend;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod monitor;
pub mod pipeline;
pub mod queue;
pub mod sanitize;
pub mod secrets;
pub mod store;

pub use backend::{AgentEvent, BackendError, EventSource, HttpBackend, IngestBackend};
pub use broadcast::{ItemEvent, ItemProgressBroadcaster, ItemView};
pub use config::{default_config_path, load_config, IntakeConfig, QueueConfig};
pub use error::{ConfigError, IntakeError, QueueError, Result};
pub use monitor::CompletionMonitor;
pub use pipeline::{Pipeline, StageError};
pub use queue::{AgentStep, FileId, IngestQueue, ItemStatus, RemoteStatus, SourceFile, UploadItem};
pub use secrets::{SecretError, TokenSource};
pub use store::{ChannelState, Observed, StatusCounts, StatusStore, WriteOutcome};
