//! Item progress broadcaster for the live queue view.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::queue::item::{AgentStep, FileId, ItemStatus, RemoteStatus, UploadItem};

/// Read-only projection of an item for presentational collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    pub id: String,
    pub filename: String,
    pub status: ItemStatus,
    pub progress: u8,
    /// Derived status line; see [`UploadItem::display_text`].
    pub display_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_status: Option<RemoteStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_step: Option<AgentStep>,
    pub attempt: u32,
    pub updated_at: DateTime<Utc>,
}

impl From<&UploadItem> for ItemView {
    fn from(item: &UploadItem) -> Self {
        Self {
            id: item.id.clone(),
            filename: item.source.name.clone(),
            status: item.status,
            progress: item.progress,
            display_text: item.display_text(),
            error: item.last_error.clone(),
            result_summary: item.result_summary.clone(),
            file_id: item.backend_file_id,
            remote_status: item.remote_status,
            agent_step: item.live_agent_step,
            attempt: item.attempt,
            updated_at: item.updated_at,
        }
    }
}

/// A change to the queue, published after every applied store write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemEvent {
    Added { item: ItemView },
    Updated { item: ItemView },
    Removed { id: String, timestamp: DateTime<Utc> },
}

impl ItemEvent {
    pub fn added(item: &UploadItem) -> Self {
        ItemEvent::Added { item: item.into() }
    }

    pub fn updated(item: &UploadItem) -> Self {
        ItemEvent::Updated { item: item.into() }
    }

    pub fn removed(id: &str) -> Self {
        ItemEvent::Removed {
            id: id.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn item_id(&self) -> &str {
        match self {
            ItemEvent::Added { item } | ItemEvent::Updated { item } => &item.id,
            ItemEvent::Removed { id, .. } => id,
        }
    }

    /// The item view carried by this event, if it was not a removal.
    pub fn view(&self) -> Option<&ItemView> {
        match self {
            ItemEvent::Added { item } | ItemEvent::Updated { item } => Some(item),
            ItemEvent::Removed { .. } => None,
        }
    }
}

/// Broadcasts item events to any number of live views.
#[derive(Clone)]
pub struct ItemProgressBroadcaster {
    sender: Arc<broadcast::Sender<ItemEvent>>,
}

impl ItemProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: ItemEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber. Slow subscribers observe `Lagged` and should
    /// re-read the full snapshot.
    pub fn subscribe(&self) -> broadcast::Receiver<ItemEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ItemProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
