pub mod item;
pub mod manager;

pub use item::{
    AgentStep, FileId, ItemStatus, RemoteStatus, SourceContent, SourceFile, UploadItem,
};
pub use manager::IngestQueue;
