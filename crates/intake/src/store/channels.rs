//! Completion-channel resources owned by an item.
//!
//! Each channel is a spawned task. Its [`ChannelHandle`] aborts the task when
//! dropped, so releasing an item's [`ChannelSet`] (terminal write, removal,
//! teardown) is just dropping it.

use std::future::Future;

use serde::Serialize;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Poll,
    Events,
}

/// Which completion channels are currently attached to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    None,
    Polling,
    Streaming,
    Both,
}

/// Owns one channel task; aborts it on drop.
#[derive(Debug)]
pub struct ChannelHandle {
    kind: ChannelKind,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    /// Spawns `future` on the current runtime as a channel of the given kind.
    pub fn spawn<F>(kind: ChannelKind, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            kind,
            task: Some(tokio::spawn(future)),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Releases the handle without aborting the task. Used by a channel that
    /// has already finished on its own and is detaching itself.
    pub(crate) fn disarm(mut self) {
        self.task.take();
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The channels attached to one item: none, a poll timer, a stream
/// subscription, or both.
#[derive(Debug, Default)]
pub struct ChannelSet {
    poll: Option<ChannelHandle>,
    events: Option<ChannelHandle>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handle: ChannelHandle) -> Self {
        self.insert(handle);
        self
    }

    /// Attaches a handle, releasing any previous one of the same kind.
    pub fn insert(&mut self, handle: ChannelHandle) {
        match handle.kind() {
            ChannelKind::Poll => self.poll = Some(handle),
            ChannelKind::Events => self.events = Some(handle),
        }
    }

    pub(crate) fn take(&mut self, kind: ChannelKind) -> Option<ChannelHandle> {
        match kind {
            ChannelKind::Poll => self.poll.take(),
            ChannelKind::Events => self.events.take(),
        }
    }

    pub fn state(&self) -> ChannelState {
        match (self.poll.is_some(), self.events.is_some()) {
            (false, false) => ChannelState::None,
            (true, false) => ChannelState::Polling,
            (false, true) => ChannelState::Streaming,
            (true, true) => ChannelState::Both,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state() == ChannelState::None
    }
}
