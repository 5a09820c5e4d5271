//! Completion detection: the poll and push channels racing to a terminal state.

mod common;

use common::*;
use intake::config::QueueConfig;
use intake::store::ChannelState;
use intake::{AgentStep, ItemStatus, RemoteStatus};

#[tokio::test]
async fn test_both_channels_attached_while_processing() {
    let harness = TestQueue::new();
    let id = harness.submit_one(pdf("a.pdf"));
    let file_id = harness.wait_processing(&id).await;

    assert_eq!(harness.queue.channel_state(&id), Some(ChannelState::Both));
    assert!(harness.events.is_open(file_id));

    wait_for("a poll", || {
        harness
            .queue
            .get(&id)
            .is_some_and(|i| i.remote_status == Some(RemoteStatus::Pending))
    })
    .await;
    let item = harness.queue.get(&id).unwrap();
    assert_eq!(item.status, ItemStatus::Processing);
    assert_eq!(item.progress, 70);
    assert_eq!(item.display_text(), "Processing (pending)");
}

#[tokio::test]
async fn test_poll_progress_estimate_rises() {
    let harness = TestQueue::new();
    let id = harness.submit_one(pdf("a.pdf"));
    harness
        .backend
        .script_polls(FIRST_FILE_ID, vec![pending(), processing()]);

    harness.wait_processing(&id).await;
    wait_for("remote processing", || {
        harness
            .queue
            .get(&id)
            .is_some_and(|i| i.remote_status == Some(RemoteStatus::Processing))
    })
    .await;
    assert_eq!(harness.queue.get(&id).unwrap().progress, 85);
}

#[tokio::test]
async fn test_poll_completion_closes_stream() {
    let harness = TestQueue::new();
    harness
        .backend
        .script_polls(FIRST_FILE_ID, vec![pending(), completed("S")]);

    let id = harness.submit_one(pdf("a.pdf"));
    let file_id = harness.wait_processing(&id).await;
    harness.wait_status(&id, ItemStatus::Completed).await;

    wait_for("stream release", || !harness.events.is_open(file_id)).await;
    assert_eq!(harness.queue.channel_state(&id), Some(ChannelState::None));

    // Late push events are ignored
    harness.events.push(file_id, event(AgentStep::Error, "late"));
    poll_intervals(2).await;
    let item = harness.queue.get(&id).unwrap();
    assert_eq!(item.status, ItemStatus::Completed);
    assert!(item.last_error.is_none());
}

#[tokio::test]
async fn test_push_done_wins_and_stops_polling() {
    let harness = TestQueue::new();
    let id = harness.submit_one(pdf("invoice.pdf"));
    let file_id = harness.wait_processing(&id).await;

    harness
        .events
        .push(file_id, event(AgentStep::Result, "Invoice from ACME, filed under Bills"));
    harness.events.push(file_id, event(AgentStep::Done, "Finished"));
    harness.wait_status(&id, ItemStatus::Completed).await;

    let item = harness.queue.get(&id).unwrap();
    assert_eq!(item.progress, 100);
    assert_eq!(
        item.result_summary.as_deref(),
        Some("Invoice from ACME, filed under Bills")
    );
    assert_eq!(item.live_agent_step, Some(AgentStep::Done));
    assert_eq!(harness.queue.channel_state(&id), Some(ChannelState::None));

    // A later poll answer must not change anything
    harness
        .backend
        .script_polls(file_id, vec![remote_failed(Some("too late"))]);
    poll_intervals(1).await;
    let polls = harness.backend.poll_count(file_id);
    poll_intervals(5).await;
    assert_eq!(harness.backend.poll_count(file_id), polls);

    let item = harness.queue.get(&id).unwrap();
    assert_eq!(item.status, ItemStatus::Completed);
    assert!(item.last_error.is_none());
}

#[tokio::test]
async fn test_remote_failure_is_terminal() {
    let harness = TestQueue::new();
    harness.backend.script_polls(
        FIRST_FILE_ID,
        vec![processing(), remote_failed(Some("Unsupported file type"))],
    );

    let id = harness.submit_one(pdf("a.pdf"));
    let file_id = harness.wait_processing(&id).await;
    harness.wait_status(&id, ItemStatus::Failed).await;

    let item = harness.queue.get(&id).unwrap();
    assert_eq!(item.last_error.as_deref(), Some("Unsupported file type"));
    assert_eq!(item.remote_status, Some(RemoteStatus::Failed));
    assert_eq!(item.progress, 85);
    wait_for("stream release", || !harness.events.is_open(file_id)).await;
}

#[tokio::test]
async fn test_remote_failure_without_message() {
    let harness = TestQueue::new();
    harness
        .backend
        .script_polls(FIRST_FILE_ID, vec![remote_failed(None)]);

    let id = harness.submit_one(pdf("a.pdf"));
    harness.wait_status(&id, ItemStatus::Failed).await;
    assert_eq!(
        harness.queue.get(&id).unwrap().last_error.as_deref(),
        Some("Processing failed")
    );
}

#[tokio::test]
async fn test_push_error_fails_item() {
    let harness = TestQueue::new();
    let id = harness.submit_one(pdf("a.pdf"));
    let file_id = harness.wait_processing(&id).await;

    harness
        .events
        .push(file_id, event(AgentStep::Error, "Model unavailable"));
    harness.wait_status(&id, ItemStatus::Failed).await;

    let item = harness.queue.get(&id).unwrap();
    assert_eq!(item.last_error.as_deref(), Some("Model unavailable"));
    assert_eq!(item.live_agent_step, Some(AgentStep::Error));

    // The poll channel was released with it
    harness
        .backend
        .script_polls(file_id, vec![completed("S")]);
    poll_intervals(4).await;
    assert_eq!(harness.queue.get(&id).unwrap().status, ItemStatus::Failed);
}

#[tokio::test]
async fn test_advisory_events_never_change_status() {
    let harness = TestQueue::new();
    let id = harness.submit_one(pdf("a.pdf"));
    let file_id = harness.wait_processing(&id).await;

    harness
        .events
        .push(file_id, event(AgentStep::Connected, "Connected"));
    harness
        .events
        .push(file_id, tool_call("list_folders", "Looking up folders"));
    wait_for("tool call message", || {
        harness.queue.get(&id).is_some_and(|i| {
            i.live_agent_message.as_deref() == Some("Looking up folders (list_folders)")
        })
    })
    .await;
    assert_eq!(
        harness.queue.get(&id).unwrap().live_agent_step,
        Some(AgentStep::ToolCall)
    );

    harness
        .events
        .push(file_id, event(AgentStep::ToolResult, "Found 12 folders"));
    harness
        .events
        .push(file_id, event(AgentStep::Status, "Reading page 2"));
    wait_for("status message", || {
        harness
            .queue
            .get(&id)
            .is_some_and(|i| i.live_agent_message.as_deref() == Some("Reading page 2"))
    })
    .await;

    let item = harness.queue.get(&id).unwrap();
    assert_eq!(item.status, ItemStatus::Processing);
    assert_eq!(item.display_text(), "Reading page 2");
    assert!(item.progress < 100);
}

#[tokio::test]
async fn test_stream_drop_falls_back_to_polling() {
    let harness = TestQueue::new();
    let id = harness.submit_one(pdf("a.pdf"));
    let file_id = harness.wait_processing(&id).await;

    harness.events.push_error(file_id, "connection reset");
    wait_for("stream detach", || {
        harness.queue.channel_state(&id) == Some(ChannelState::Polling)
    })
    .await;
    assert_eq!(harness.queue.get(&id).unwrap().status, ItemStatus::Processing);

    harness
        .backend
        .script_polls(file_id, vec![completed("S")]);
    harness.wait_status(&id, ItemStatus::Completed).await;
    assert_eq!(
        harness.queue.get(&id).unwrap().result_summary.as_deref(),
        Some("S")
    );
}

#[tokio::test]
async fn test_server_closed_stream_falls_back_to_polling() {
    let harness = TestQueue::new();
    let id = harness.submit_one(pdf("a.pdf"));
    let file_id = harness.wait_processing(&id).await;

    harness.events.close(file_id);
    wait_for("stream detach", || {
        harness.queue.channel_state(&id) == Some(ChannelState::Polling)
    })
    .await;

    harness
        .backend
        .script_polls(file_id, vec![completed("S")]);
    harness.wait_status(&id, ItemStatus::Completed).await;
}

#[tokio::test]
async fn test_refused_subscription_relies_on_polling() {
    let harness = TestQueue::new();
    harness.events.refuse_subscriptions();
    harness
        .backend
        .script_polls(FIRST_FILE_ID, vec![pending(), pending(), completed("S")]);

    let id = harness.submit_one(pdf("a.pdf"));
    harness.wait_status(&id, ItemStatus::Completed).await;
    assert!(!harness.events.is_subscribed(FIRST_FILE_ID));
}

#[tokio::test]
async fn test_poll_errors_do_not_fail_item() {
    let harness = TestQueue::new();
    harness.backend.script_polls(
        FIRST_FILE_ID,
        vec![poll_unreachable(), poll_unreachable(), completed("S")],
    );

    let id = harness.submit_one(pdf("a.pdf"));
    harness.wait_status(&id, ItemStatus::Completed).await;
    assert!(harness.backend.poll_count(FIRST_FILE_ID) >= 3);
}

#[tokio::test]
async fn test_processing_timeout() {
    let config = QueueConfig {
        processing_timeout_secs: Some(1),
        ..test_queue_config(4)
    };
    let harness = TestQueue::with_config(config);

    let id = harness.submit_one(pdf("a.pdf"));
    let file_id = harness.wait_processing(&id).await;
    harness.wait_status(&id, ItemStatus::Failed).await;

    assert_eq!(
        harness.queue.get(&id).unwrap().last_error.as_deref(),
        Some("Processing timed out")
    );
    wait_for("stream release", || !harness.events.is_open(file_id)).await;
}

#[tokio::test]
async fn test_zero_poll_interval_still_polls() {
    let config = QueueConfig {
        poll_interval_ms: 0,
        ..test_queue_config(4)
    };
    let harness = TestQueue::with_config(config);
    harness
        .backend
        .script_polls(FIRST_FILE_ID, vec![pending(), completed("S")]);

    let id = harness.submit_one(pdf("a.pdf"));
    harness.wait_status(&id, ItemStatus::Completed).await;

    let item = harness.queue.get(&id).unwrap();
    assert_eq!(item.result_summary.as_deref(), Some("S"));
    assert_eq!(harness.queue.channel_state(&id), Some(ChannelState::None));
    assert!(harness.backend.poll_count(FIRST_FILE_ID) >= 2);
}
