use thiserror::Error;

use crate::backend::BackendError;

/// The request/response stage that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Upload,
    CreateRecord,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Upload => write!(f, "Upload"),
            Stage::CreateRecord => write!(f, "Record creation"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("{stage} failed: {source}")]
    Failed {
        stage: Stage,
        #[source]
        source: BackendError,
    },

    /// The item was removed, retried, or torn down while the stage was in flight.
    #[error("Item no longer accepts updates")]
    Abandoned,
}

impl StageError {
    pub fn failed(stage: Stage, source: BackendError) -> Self {
        StageError::Failed { stage, source }
    }

    /// Text stored as the item's `last_error`: the collaborator's own message.
    pub fn item_message(&self) -> String {
        match self {
            StageError::Failed { source, .. } => source.to_string(),
            StageError::Abandoned => self.to_string(),
        }
    }
}
