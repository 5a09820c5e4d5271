use std::ops::ControlFlow;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{WatchTarget, PROCESSING_FAILED};
use crate::backend::{AgentEvent, EventSource};
use crate::queue::item::AgentStep;
use crate::store::{ChannelKind, Observed, StatusStore};

/// Push subscription to the agent event stream. Advisory steps only update
/// the live message; `done` and `error` are terminal.
pub(super) struct EventChannel {
    pub source: Arc<dyn EventSource>,
    pub store: Arc<StatusStore>,
    pub target: WatchTarget,
}

impl EventChannel {
    pub async fn run(self, ready: oneshot::Receiver<()>) {
        if ready.await.is_err() {
            return;
        }

        let mut stream = match self.source.subscribe(self.target.file_id).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Event stream unavailable, relying on polling");
                self.detach();
                return;
            }
        };

        // Message of the last `result` event, used when `done` arrives
        let mut summary: Option<String> = None;

        while let Some(next) = stream.next().await {
            match next {
                Ok(event) => {
                    if self.apply(event, &mut summary).is_break() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Event stream dropped, relying on polling");
                    break;
                }
            }
        }

        debug!("Event stream closed");
        self.detach();
    }

    fn apply(&self, event: AgentEvent, summary: &mut Option<String>) -> ControlFlow<()> {
        let WatchTarget { id, attempt, .. } = &self.target;
        debug!(step = ?event.step, message = %event.message, "Agent event");

        match event.step {
            AgentStep::Done => {
                info!("Agent reported done");
                let observed = Observed::agent(AgentStep::Done, event.message);
                self.store.complete(id, *attempt, summary.take(), observed);
                ControlFlow::Break(())
            }
            AgentStep::Error => {
                let error = if event.message.is_empty() {
                    PROCESSING_FAILED
                } else {
                    event.message.as_str()
                };
                info!(error = %error, "Agent reported error");
                let observed = Observed::agent(AgentStep::Error, error);
                self.store.fail(id, *attempt, error, observed);
                ControlFlow::Break(())
            }
            step => {
                if step == AgentStep::Result && !event.message.is_empty() {
                    *summary = Some(event.message.clone());
                }
                let outcome =
                    self.store
                        .agent_update(id, *attempt, step, &event.display_message());
                if outcome.is_stale() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }
        }
    }

    fn detach(&self) {
        self.store
            .detach_channel(&self.target.id, self.target.attempt, ChannelKind::Events);
    }
}
