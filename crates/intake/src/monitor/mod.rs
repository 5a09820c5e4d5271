//! Completion detection for items in `processing`.
//!
//! Every watched item gets two channels: a poll loop against the status
//! endpoint and a subscription to its agent event stream. Both write into the
//! [`StatusStore`]. Whichever reports a terminal outcome first wins, and that
//! write releases both channels.

mod events;
mod poller;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info_span, Instrument};

use crate::backend::{EventSource, IngestBackend};
use crate::queue::item::FileId;
use crate::store::{ChannelHandle, ChannelKind, ChannelSet, StatusStore, WriteOutcome};

use events::EventChannel;
use poller::PollChannel;

/// Error text used when the backend reports failure without a message.
pub const PROCESSING_FAILED: &str = "Processing failed";
pub const PROCESSING_TIMED_OUT: &str = "Processing timed out";

/// Shortest poll period; `tokio::time::interval` rejects zero.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The item attempt a channel reports for.
#[derive(Debug, Clone)]
pub(crate) struct WatchTarget {
    pub id: String,
    pub attempt: u32,
    pub file_id: FileId,
}

pub struct CompletionMonitor {
    backend: Arc<dyn IngestBackend>,
    events: Arc<dyn EventSource>,
    store: Arc<StatusStore>,
    poll_interval: Duration,
    processing_timeout: Option<Duration>,
}

impl CompletionMonitor {
    pub fn new(
        backend: Arc<dyn IngestBackend>,
        events: Arc<dyn EventSource>,
        store: Arc<StatusStore>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            backend,
            events,
            store,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            processing_timeout: None,
        }
    }

    /// Fails items that stay in `processing` longer than `timeout`.
    pub fn with_processing_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.processing_timeout = timeout;
        self
    }

    /// Starts both completion channels for a `processing` item.
    ///
    /// The channels are attached to the item before either starts work, so a
    /// terminal write can never race ahead of the attachment. Returns `Stale`
    /// when the item already left `processing`; the channels are then
    /// released without having done anything.
    pub fn watch(&self, id: &str, attempt: u32, file_id: FileId) -> WriteOutcome {
        let target = WatchTarget {
            id: id.to_string(),
            attempt,
            file_id,
        };
        let span = info_span!("monitor", item_id = %id, file_id);

        let (start_poll, poll_ready) = oneshot::channel();
        let (start_events, events_ready) = oneshot::channel();

        let poll = PollChannel {
            backend: Arc::clone(&self.backend),
            store: Arc::clone(&self.store),
            target: target.clone(),
            interval: self.poll_interval,
            timeout: self.processing_timeout,
        };
        let events = EventChannel {
            source: Arc::clone(&self.events),
            store: Arc::clone(&self.store),
            target,
        };

        let channels = ChannelSet::new()
            .with(ChannelHandle::spawn(
                ChannelKind::Poll,
                poll.run(poll_ready).instrument(span.clone()),
            ))
            .with(ChannelHandle::spawn(
                ChannelKind::Events,
                events.run(events_ready).instrument(span),
            ));

        let outcome = self.store.attach_channels(id, attempt, channels);
        if outcome.is_applied() {
            let _ = start_poll.send(());
            let _ = start_events.send(());
        } else {
            debug!(item_id = %id, "Item left processing before monitoring started");
        }
        outcome
    }
}
