use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info};

use crate::backend::{EventSource, HttpBackend, IngestBackend};
use crate::broadcast::{ItemEvent, ItemProgressBroadcaster, ItemView};
use crate::config::{IntakeConfig, QueueConfig};
use crate::error::{IntakeError, QueueError};
use crate::monitor::CompletionMonitor;
use crate::pipeline::Pipeline;
use crate::store::{ChannelState, StatusCounts, StatusStore};

use super::item::{SourceFile, UploadItem};

/// Front door of the orchestrator: accepts files, runs one pipeline per item,
/// and exposes retry, removal and teardown.
///
/// Methods that start pipelines must be called from within a Tokio runtime.
/// Dropping the queue tears it down.
pub struct IngestQueue {
    store: Arc<StatusStore>,
    pipeline: Arc<Pipeline>,
    /// Bounds pipelines in the upload/create/trigger stages. Closed on shutdown.
    limiter: Arc<Semaphore>,
    shutdown: Notify,
}

impl IngestQueue {
    pub fn new(
        config: &QueueConfig,
        backend: Arc<dyn IngestBackend>,
        events: Arc<dyn EventSource>,
    ) -> Self {
        let store = Arc::new(StatusStore::new(ItemProgressBroadcaster::new(
            config.event_capacity,
        )));
        let monitor = CompletionMonitor::new(
            Arc::clone(&backend),
            events,
            Arc::clone(&store),
            config.poll_interval(),
        )
        .with_processing_timeout(config.processing_timeout());
        let pipeline = Pipeline::new(backend, Arc::clone(&store), monitor, config.folder_id);

        info!(
            max_concurrent = config.max_concurrent,
            poll_interval_ms = config.poll_interval_ms,
            "Ingest queue ready"
        );

        Self {
            store,
            pipeline: Arc::new(pipeline),
            limiter: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            shutdown: Notify::new(),
        }
    }

    /// Production constructor: talks to the configured API over HTTP.
    pub fn from_config(config: &IntakeConfig) -> Result<Self, IntakeError> {
        let backend = Arc::new(HttpBackend::new(&config.api)?);
        let events: Arc<dyn EventSource> = backend.clone();
        Ok(Self::new(&config.queue, backend, events))
    }

    /// Queues every file and starts its pipeline. Returns the new item ids in
    /// submission order.
    pub fn submit(&self, files: Vec<SourceFile>) -> Result<Vec<String>, QueueError> {
        let mut ids = Vec::with_capacity(files.len());
        for source in files {
            let item = UploadItem::new(source.clone());
            let id = item.id.clone();
            self.store.insert(item)?;
            debug!(item_id = %id, filename = %source.log_name(), "Queued");
            self.spawn_pipeline(id.clone(), 1, source);
            ids.push(id);
        }

        if !ids.is_empty() {
            info!("Submitted {} file(s)", ids.len());
        }
        Ok(ids)
    }

    /// Restarts a failed item from the upload stage.
    pub fn retry(&self, id: &str) -> Result<(), QueueError> {
        let (attempt, source) = self.store.reset_for_retry(id)?;
        info!(item_id = %id, attempt, "Retrying");
        self.spawn_pipeline(id.to_string(), attempt, source);
        Ok(())
    }

    /// Releases the item's channels and deletes it. In-flight calls for it
    /// resolve into no-ops.
    pub fn remove(&self, id: &str) -> Result<(), QueueError> {
        match self.store.remove(id) {
            Some(_) => {
                debug!(item_id = %id, "Removed");
                Ok(())
            }
            None => Err(QueueError::NotFound(id.to_string())),
        }
    }

    /// Removes every completed item, returning the removed ids.
    pub fn clear_completed(&self) -> Vec<String> {
        let removed = self.store.remove_completed();
        if !removed.is_empty() {
            debug!("Cleared {} completed item(s)", removed.len());
        }
        removed
    }

    pub fn items(&self) -> Vec<ItemView> {
        self.store.views()
    }

    pub fn snapshot(&self) -> Vec<UploadItem> {
        self.store.snapshot()
    }

    pub fn get(&self, id: &str) -> Option<UploadItem> {
        self.store.get(id)
    }

    pub fn counts(&self) -> StatusCounts {
        self.store.counts()
    }

    pub fn channel_state(&self, id: &str) -> Option<ChannelState> {
        self.store.channel_state(id)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ItemEvent> {
        self.store.subscribe()
    }

    /// Waits until no item is queued or in flight, or until shutdown.
    pub async fn wait_until_settled(&self) -> StatusCounts {
        let mut rx = self.store.subscribe();
        loop {
            let shut_down = self.shutdown.notified();
            let counts = self.store.counts();
            if counts.active() == 0 || self.store.is_closed() {
                return counts;
            }

            tokio::select! {
                received = rx.recv() => match received {
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return self.store.counts(),
                },
                _ = shut_down => {}
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.store.is_closed()
    }

    /// Tears the orchestrator down: releases every attached channel, turns all
    /// later writes into no-ops, and stops pipelines still waiting for a permit.
    /// Items stay readable. Returns how many items had channels released.
    pub fn shutdown(&self) -> usize {
        if self.store.is_closed() {
            return 0;
        }

        info!("Shutting down ingest queue...");
        self.limiter.close();
        let released = self.store.close();
        self.shutdown.notify_waiters();
        info!(released, "Ingest queue stopped");
        released
    }

    fn spawn_pipeline(&self, id: String, attempt: u32, source: SourceFile) {
        let pipeline = Arc::clone(&self.pipeline);
        let limiter = Arc::clone(&self.limiter);
        tokio::spawn(async move {
            // Fails only once the queue is shut down
            let Ok(_permit) = limiter.acquire_owned().await else {
                return;
            };
            let _ = pipeline.run(&id, attempt, &source).await;
        });
    }
}

impl Drop for IngestQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
