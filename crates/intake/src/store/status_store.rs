//! Authoritative item state, keyed by item id.
//!
//! Every write names the `(id, attempt)` it was issued for. Writes against a
//! removed item, an older attempt, or an item that is already terminal are
//! no-ops, which makes the terminal write idempotent when the poll and push
//! channels race.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::broadcast::{ItemEvent, ItemProgressBroadcaster, ItemView};
use crate::error::QueueError;
use crate::pipeline::progress;
use crate::queue::item::{AgentStep, FileId, ItemStatus, RemoteStatus, SourceFile, UploadItem};

use super::channels::{ChannelKind, ChannelSet, ChannelState};

/// Result of a guarded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The item is gone, terminal, on a newer attempt, or the transition was illegal.
    Stale,
}

impl WriteOutcome {
    pub fn is_applied(self) -> bool {
        self == WriteOutcome::Applied
    }

    pub fn is_stale(self) -> bool {
        self == WriteOutcome::Stale
    }
}

/// Which channel saw a terminal outcome. Recorded in the same write as the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    /// Stage error or processing timeout.
    Local,
    /// A poll answer.
    Remote(RemoteStatus),
    /// A push event.
    Agent { step: AgentStep, message: String },
}

impl Observed {
    pub fn agent(step: AgentStep, message: impl Into<String>) -> Self {
        Observed::Agent {
            step,
            message: message.into(),
        }
    }

    fn record(self, item: &mut UploadItem) {
        match self {
            Observed::Local => {}
            Observed::Remote(remote) => item.remote_status = Some(remote),
            Observed::Agent { step, message } => {
                item.live_agent_step = Some(step);
                item.live_agent_message = Some(message);
            }
        }
    }
}

/// Item totals by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub queued: usize,
    pub uploading: usize,
    pub creating: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.queued + self.uploading + self.creating + self.processing + self.completed + self.failed
    }

    pub fn active(&self) -> usize {
        self.queued + self.uploading + self.creating + self.processing
    }
}

struct Entry {
    item: UploadItem,
    channels: ChannelSet,
}

#[derive(Default)]
struct Inner {
    /// Insertion order; never reordered.
    order: Vec<String>,
    entries: HashMap<String, Entry>,
    closed: bool,
}

/// Item store backed by a single lock; every applied write is broadcast.
pub struct StatusStore {
    inner: RwLock<Inner>,
    broadcaster: ItemProgressBroadcaster,
}

impl StatusStore {
    pub fn new(broadcaster: ItemProgressBroadcaster) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            broadcaster,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Status store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Status store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    // ─── Reads ──────────────────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<ItemEvent> {
        self.broadcaster.subscribe()
    }

    pub fn get(&self, id: &str) -> Option<UploadItem> {
        self.read().entries.get(id).map(|e| e.item.clone())
    }

    /// All items in insertion order.
    pub fn snapshot(&self) -> Vec<UploadItem> {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .map(|e| e.item.clone())
            .collect()
    }

    pub fn views(&self) -> Vec<ItemView> {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .map(|e| ItemView::from(&e.item))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.read().closed
    }

    pub fn counts(&self) -> StatusCounts {
        let inner = self.read();
        let mut counts = StatusCounts::default();
        for entry in inner.entries.values() {
            match entry.item.status {
                ItemStatus::Queued => counts.queued += 1,
                ItemStatus::Uploading => counts.uploading += 1,
                ItemStatus::Creating => counts.creating += 1,
                ItemStatus::Processing => counts.processing += 1,
                ItemStatus::Completed => counts.completed += 1,
                ItemStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn channel_state(&self, id: &str) -> Option<ChannelState> {
        self.read().entries.get(id).map(|e| e.channels.state())
    }

    // ─── Membership ─────────────────────────────────────────────────────────

    /// Appends a new item at the end of the queue.
    pub fn insert(&self, item: UploadItem) -> Result<(), QueueError> {
        let mut inner = self.write();
        if inner.closed {
            return Err(QueueError::ShutDown);
        }

        self.broadcaster.send(ItemEvent::added(&item));
        inner.order.push(item.id.clone());
        inner.entries.insert(
            item.id.clone(),
            Entry {
                item,
                channels: ChannelSet::new(),
            },
        );
        Ok(())
    }

    /// Deletes an item and releases its channels. Late writes for the id become no-ops.
    pub fn remove(&self, id: &str) -> Option<UploadItem> {
        let removed = {
            let mut inner = self.write();
            let entry = inner.entries.remove(id)?;
            inner.order.retain(|existing| existing != id);
            self.broadcaster.send(ItemEvent::removed(id));
            entry
        };

        let Entry { item, channels } = removed;
        drop(channels);
        Some(item)
    }

    /// Removes every completed item, returning their ids in queue order.
    pub fn remove_completed(&self) -> Vec<String> {
        let mut released = Vec::new();
        let ids = {
            let mut inner = self.write();
            let ids: Vec<String> = inner
                .order
                .iter()
                .filter(|id| {
                    inner
                        .entries
                        .get(*id)
                        .is_some_and(|e| e.item.status == ItemStatus::Completed)
                })
                .cloned()
                .collect();

            for id in &ids {
                if let Some(entry) = inner.entries.remove(id) {
                    released.push(entry.channels);
                }
                self.broadcaster.send(ItemEvent::removed(id));
            }
            inner.order.retain(|id| !ids.contains(id));
            ids
        };

        drop(released);
        ids
    }

    /// Moves a failed item back to `queued` under a new attempt, returning the
    /// attempt number and source needed to restart its pipeline.
    pub fn reset_for_retry(&self, id: &str) -> Result<(u32, SourceFile), QueueError> {
        let mut inner = self.write();
        if inner.closed {
            return Err(QueueError::ShutDown);
        }

        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        if entry.item.status != ItemStatus::Failed {
            return Err(QueueError::NotRetryable {
                id: id.to_string(),
                status: entry.item.status.to_string(),
            });
        }

        entry.item.reset_for_retry();
        self.broadcaster.send(ItemEvent::updated(&entry.item));
        Ok((entry.item.attempt, entry.item.source.clone()))
    }

    /// Teardown: releases every attached channel and rejects all further writes.
    /// Items stay readable.
    pub fn close(&self) -> usize {
        let released: Vec<ChannelSet> = {
            let mut inner = self.write();
            inner.closed = true;
            inner
                .entries
                .values_mut()
                .map(|e| std::mem::take(&mut e.channels))
                .filter(|set| !set.is_empty())
                .collect()
        };

        let count = released.len();
        drop(released);
        count
    }

    // ─── Channel bookkeeping ────────────────────────────────────────────────

    /// Attaches completion channels to a `processing` item. If the item can no
    /// longer accept them (removed, terminal, newer attempt, closed) the set is
    /// released immediately.
    pub fn attach_channels(&self, id: &str, attempt: u32, channels: ChannelSet) -> WriteOutcome {
        let mut rejected = None;
        let outcome = {
            let mut inner = self.write();
            let closed = inner.closed;
            match inner.entries.get_mut(id) {
                Some(entry)
                    if !closed
                        && entry.item.attempt == attempt
                        && entry.item.status == ItemStatus::Processing =>
                {
                    let mut channels = channels;
                    for kind in [ChannelKind::Poll, ChannelKind::Events] {
                        if let Some(handle) = channels.take(kind) {
                            entry.channels.insert(handle);
                        }
                    }
                    WriteOutcome::Applied
                }
                _ => {
                    rejected = Some(channels);
                    WriteOutcome::Stale
                }
            }
        };

        drop(rejected);
        outcome
    }

    /// Forgets a channel that ended on its own (stream closed). Does not abort it.
    pub fn detach_channel(&self, id: &str, attempt: u32, kind: ChannelKind) -> bool {
        let handle = {
            let mut inner = self.write();
            match inner.entries.get_mut(id) {
                Some(entry) if entry.item.attempt == attempt => entry.channels.take(kind),
                _ => None,
            }
        };

        match handle {
            Some(handle) => {
                handle.disarm();
                true
            }
            None => false,
        }
    }

    // ─── Guarded item writes ────────────────────────────────────────────────

    /// Applies `update` to a live, non-terminal item of the given attempt.
    ///
    /// `update` must leave the item untouched when it returns false. A write
    /// that makes the item terminal releases its channels.
    fn write_item<F>(&self, id: &str, attempt: u32, update: F) -> WriteOutcome
    where
        F: FnOnce(&mut UploadItem) -> bool,
    {
        let released = {
            let mut inner = self.write();
            if inner.closed {
                return WriteOutcome::Stale;
            }

            let Some(entry) = inner.entries.get_mut(id) else {
                return WriteOutcome::Stale;
            };
            if entry.item.attempt != attempt || entry.item.is_terminal() {
                return WriteOutcome::Stale;
            }
            if !update(&mut entry.item) {
                return WriteOutcome::Stale;
            }

            entry.item.updated_at = Utc::now();
            self.broadcaster.send(ItemEvent::updated(&entry.item));

            if entry.item.is_terminal() {
                std::mem::take(&mut entry.channels)
            } else {
                ChannelSet::new()
            }
        };

        drop(released);
        WriteOutcome::Applied
    }

    fn advance(item: &mut UploadItem, next: ItemStatus, progress: u8) -> bool {
        if !item.status.can_advance_to(next) {
            return false;
        }
        item.status = next;
        item.progress = item.progress.max(progress);
        true
    }

    /// `queued → uploading`.
    pub fn begin_upload(&self, id: &str, attempt: u32) -> WriteOutcome {
        self.write_item(id, attempt, |item| {
            Self::advance(item, ItemStatus::Uploading, progress::UPLOAD_STARTED)
        })
    }

    /// `uploading → creating`, recording the storage key.
    pub fn upload_succeeded(&self, id: &str, attempt: u32, storage_key: &str) -> WriteOutcome {
        self.write_item(id, attempt, |item| {
            if !Self::advance(item, ItemStatus::Creating, progress::UPLOADED) {
                return false;
            }
            item.storage_key = Some(storage_key.to_string());
            true
        })
    }

    /// `creating → processing`, recording the backend file id.
    pub fn record_created(&self, id: &str, attempt: u32, file_id: FileId) -> WriteOutcome {
        self.write_item(id, attempt, |item| {
            if !Self::advance(item, ItemStatus::Processing, progress::RECORD_CREATED) {
                return false;
            }
            item.backend_file_id = Some(file_id);
            true
        })
    }

    /// Mirrors a non-terminal remote status observed by the poll channel.
    pub fn remote_progress(&self, id: &str, attempt: u32, remote: RemoteStatus) -> WriteOutcome {
        self.write_item(id, attempt, |item| {
            if item.status != ItemStatus::Processing {
                return false;
            }
            item.remote_status = Some(remote);
            item.progress = item.progress.max(progress::estimate_remote(remote));
            true
        })
    }

    /// Records an advisory push-channel message. Never changes `status`.
    pub fn agent_update(
        &self,
        id: &str,
        attempt: u32,
        step: AgentStep,
        message: &str,
    ) -> WriteOutcome {
        self.write_item(id, attempt, |item| {
            if item.status != ItemStatus::Processing || step.is_terminal() {
                return false;
            }
            item.live_agent_step = Some(step);
            item.live_agent_message = Some(message.to_string());
            true
        })
    }

    /// `processing → completed`. Only the first terminal write for an attempt applies.
    pub fn complete(
        &self,
        id: &str,
        attempt: u32,
        summary: Option<String>,
        observed: Observed,
    ) -> WriteOutcome {
        self.write_item(id, attempt, |item| {
            if !Self::advance(item, ItemStatus::Completed, progress::COMPLETE) {
                return false;
            }
            if summary.is_some() {
                item.result_summary = summary;
            }
            observed.record(item);
            true
        })
    }

    /// Any non-terminal state → `failed`. Progress stays where it was.
    pub fn fail(
        &self,
        id: &str,
        attempt: u32,
        error: &str,
        observed: Observed,
    ) -> WriteOutcome {
        self.write_item(id, attempt, |item| {
            if !item.status.can_advance_to(ItemStatus::Failed) {
                return false;
            }
            item.status = ItemStatus::Failed;
            item.last_error = Some(error.to_string());
            observed.record(item);
            true
        })
    }
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new(ItemProgressBroadcaster::default())
    }
}
