use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{WatchTarget, PROCESSING_FAILED, PROCESSING_TIMED_OUT};
use crate::backend::{IngestBackend, RemoteRecord};
use crate::queue::item::RemoteStatus;
use crate::store::{Observed, StatusStore};

/// Timer-driven status polling. Authoritative: it keeps running when the event
/// stream drops, and request failures only delay it.
pub(super) struct PollChannel {
    pub backend: Arc<dyn IngestBackend>,
    pub store: Arc<StatusStore>,
    pub target: WatchTarget,
    pub interval: Duration,
    pub timeout: Option<Duration>,
}

impl PollChannel {
    pub async fn run(self, ready: oneshot::Receiver<()>) {
        if ready.await.is_err() {
            return;
        }

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer.tick().await; // skip immediate first tick

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = wait_for(deadline) => {
                    warn!("No terminal status within the processing timeout");
                    self.store.fail(
                        &self.target.id,
                        self.target.attempt,
                        PROCESSING_TIMED_OUT,
                        Observed::Local,
                    );
                    return;
                }
            }

            match self.backend.get_record(self.target.file_id).await {
                Ok(record) => {
                    if self.apply(record) {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "Status poll failed, will retry"),
            }
        }
    }

    /// Writes one poll result. Returns true once polling should stop.
    fn apply(&self, record: RemoteRecord) -> bool {
        let WatchTarget { id, attempt, .. } = &self.target;

        match record.processing_status {
            RemoteStatus::Completed => {
                info!("Backend reported processing completed");
                self.store.complete(
                    id,
                    *attempt,
                    record.summary,
                    Observed::Remote(RemoteStatus::Completed),
                );
                true
            }
            RemoteStatus::Failed => {
                let error = record
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| PROCESSING_FAILED.to_string());
                info!(error = %error, "Backend reported processing failed");
                self.store
                    .fail(id, *attempt, &error, Observed::Remote(RemoteStatus::Failed));
                true
            }
            remote => {
                debug!(remote = %remote, "Still processing");
                // Stale means the item is gone or already terminal
                self.store.remote_progress(id, *attempt, remote).is_stale()
            }
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}
