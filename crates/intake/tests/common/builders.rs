//! Small constructors for test inputs and scripted backend answers.

#![allow(dead_code)]

use intake::backend::{AgentEvent, BackendError, RemoteRecord};
use intake::{AgentStep, RemoteStatus, SourceFile};

pub fn pdf(name: &str) -> SourceFile {
    SourceFile::from_bytes(name, b"%PDF-1.7 test document".to_vec(), None)
}

pub fn pdfs(names: &[&str]) -> Vec<SourceFile> {
    names.iter().map(|name| pdf(name)).collect()
}

pub fn pending() -> Result<RemoteRecord, BackendError> {
    Ok(RemoteRecord::with_status(RemoteStatus::Pending))
}

pub fn processing() -> Result<RemoteRecord, BackendError> {
    Ok(RemoteRecord::with_status(RemoteStatus::Processing))
}

pub fn completed(summary: &str) -> Result<RemoteRecord, BackendError> {
    Ok(RemoteRecord {
        processing_status: RemoteStatus::Completed,
        summary: Some(summary.to_string()),
        error: None,
    })
}

pub fn remote_failed(error: Option<&str>) -> Result<RemoteRecord, BackendError> {
    Ok(RemoteRecord {
        processing_status: RemoteStatus::Failed,
        summary: None,
        error: error.map(String::from),
    })
}

pub fn poll_unreachable() -> Result<RemoteRecord, BackendError> {
    Err(BackendError::Transport("connection refused".to_string()))
}

pub fn event(step: AgentStep, message: &str) -> AgentEvent {
    AgentEvent::new(step, message)
}

pub fn tool_call(tool: &str, message: &str) -> AgentEvent {
    AgentEvent {
        step: AgentStep::ToolCall,
        message: message.to_string(),
        tool: Some(tool.to_string()),
    }
}
