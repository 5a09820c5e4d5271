//! Scripted, in-memory collaborators for driving the queue end to end.
//!
//! `ScriptedBackend` answers the request/response calls from per-file poll
//! scripts and records every call. `ScriptedEvents` hands out one channel-backed
//! event stream per file so tests can push agent events, drop the stream, or
//! observe that the subscription was released.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::{mpsc, Semaphore};

use intake::backend::{
    AgentEvent, AgentEventStream, BackendError, CreateRecordRequest, EventSource, IngestBackend,
    RecordHandle, RemoteRecord, TriggerReceipt, UploadReceipt,
};
use intake::config::QueueConfig;
use intake::{FileId, IngestQueue, RemoteStatus, SourceFile};

pub const FIRST_FILE_ID: FileId = 42;
pub const TEST_POLL_INTERVAL_MS: u64 = 20;
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// A recorded collaborator call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Upload(String),
    Create(CreateRecordRequest),
    Trigger(FileId),
    GetRecord(FileId),
}

#[derive(Default)]
pub struct ScriptedBackend {
    calls: Mutex<Vec<Call>>,
    next_file_id: AtomicI64,
    /// Upload failures to hand out before uploads start succeeding.
    upload_failures: Mutex<VecDeque<BackendError>>,
    create_failures: Mutex<VecDeque<BackendError>>,
    trigger_error: Mutex<Option<BackendError>>,
    /// Per-file poll answers; the last one repeats.
    records: Mutex<HashMap<FileId, VecDeque<Result<RemoteRecord, BackendError>>>>,
    /// When set, uploads wait for a permit before answering.
    upload_gate: Mutex<Option<Arc<Semaphore>>>,
    uploads_in_flight: AtomicUsize,
    max_uploads_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            next_file_id: AtomicI64::new(FIRST_FILE_ID),
            ..Default::default()
        }
    }

    pub fn fail_next_upload(&self, message: &str) {
        self.upload_failures
            .lock()
            .unwrap()
            .push_back(BackendError::Transport(message.to_string()));
    }

    pub fn fail_next_create(&self, error: BackendError) {
        self.create_failures.lock().unwrap().push_back(error);
    }

    pub fn fail_triggers(&self, error: BackendError) {
        *self.trigger_error.lock().unwrap() = Some(error);
    }

    /// Queues poll answers for a file. The last answer keeps repeating.
    pub fn script_polls(&self, file_id: FileId, answers: Vec<Result<RemoteRecord, BackendError>>) {
        self.records
            .lock()
            .unwrap()
            .entry(file_id)
            .or_default()
            .extend(answers);
    }

    /// Makes uploads block until `release_uploads` hands out permits.
    pub fn gate_uploads(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.upload_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn upload_count(&self) -> usize {
        self.count(|c| matches!(c, Call::Upload(_)))
    }

    pub fn create_count(&self) -> usize {
        self.count(|c| matches!(c, Call::Create(_)))
    }

    pub fn triggered(&self) -> Vec<FileId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Trigger(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn poll_count(&self, file_id: FileId) -> usize {
        self.count(|c| *c == Call::GetRecord(file_id))
    }

    pub fn uploads_in_flight(&self) -> usize {
        self.uploads_in_flight.load(Ordering::SeqCst)
    }

    pub fn max_uploads_in_flight(&self) -> usize {
        self.max_uploads_in_flight.load(Ordering::SeqCst)
    }

    fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| matches(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl IngestBackend for ScriptedBackend {
    async fn upload_blob(&self, file: &SourceFile) -> Result<UploadReceipt, BackendError> {
        self.record(Call::Upload(file.name.clone()));

        let in_flight = self.uploads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_uploads_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let gate = self.upload_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.uploads_in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.upload_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(UploadReceipt {
            storage_key: format!("k{}", self.upload_count()),
        })
    }

    async fn create_record(
        &self,
        request: &CreateRecordRequest,
    ) -> Result<RecordHandle, BackendError> {
        self.record(Call::Create(request.clone()));
        if let Some(error) = self.create_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(RecordHandle {
            file_id: self.next_file_id.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn trigger_processing(&self, file_id: FileId) -> Result<TriggerReceipt, BackendError> {
        self.record(Call::Trigger(file_id));
        match self.trigger_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(TriggerReceipt {
                status: "processing".to_string(),
            }),
        }
    }

    async fn get_record(&self, file_id: FileId) -> Result<RemoteRecord, BackendError> {
        self.record(Call::GetRecord(file_id));
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&file_id) {
            Some(script) if script.len() > 1 => script
                .pop_front()
                .unwrap_or_else(|| Ok(RemoteRecord::with_status(RemoteStatus::Pending))),
            Some(script) => script
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(RemoteRecord::with_status(RemoteStatus::Pending))),
            None => Ok(RemoteRecord::with_status(RemoteStatus::Pending)),
        }
    }
}

type EventSender = mpsc::UnboundedSender<Result<AgentEvent, BackendError>>;

#[derive(Default)]
pub struct ScriptedEvents {
    streams: Mutex<HashMap<FileId, EventSender>>,
    refuse: AtomicBool,
}

impl ScriptedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subscription attempt fail.
    pub fn refuse_subscriptions(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn is_subscribed(&self, file_id: FileId) -> bool {
        self.streams.lock().unwrap().contains_key(&file_id)
    }

    /// True while the subscriber still holds its end of the stream.
    pub fn is_open(&self, file_id: FileId) -> bool {
        self.streams
            .lock()
            .unwrap()
            .get(&file_id)
            .is_some_and(|tx| !tx.is_closed())
    }

    pub async fn wait_subscribed(&self, file_id: FileId) {
        wait_for("event subscription", || self.is_subscribed(file_id)).await;
    }

    pub fn push(&self, file_id: FileId, event: AgentEvent) -> bool {
        self.send(file_id, Ok(event))
    }

    /// Delivers a transport error, which ends the stream.
    pub fn push_error(&self, file_id: FileId, message: &str) -> bool {
        self.send(file_id, Err(BackendError::Stream(message.to_string())))
    }

    /// Ends the stream as if the server closed it.
    pub fn close(&self, file_id: FileId) {
        if let Some(tx) = self.streams.lock().unwrap().get_mut(&file_id) {
            let (closed, _) = mpsc::unbounded_channel();
            *tx = closed;
        }
    }

    fn send(&self, file_id: FileId, item: Result<AgentEvent, BackendError>) -> bool {
        self.streams
            .lock()
            .unwrap()
            .get(&file_id)
            .is_some_and(|tx| tx.send(item).is_ok())
    }
}

#[async_trait]
impl EventSource for ScriptedEvents {
    async fn subscribe(&self, file_id: FileId) -> Result<AgentEventStream, BackendError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 503,
                body: "relay unavailable".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().insert(file_id, tx);

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

/// A queue wired to scripted collaborators.
pub struct TestQueue {
    pub queue: IngestQueue,
    pub backend: Arc<ScriptedBackend>,
    pub events: Arc<ScriptedEvents>,
}

impl TestQueue {
    pub fn new() -> Self {
        Self::with_config(test_queue_config(4))
    }

    pub fn with_config(config: QueueConfig) -> Self {
        let backend = Arc::new(ScriptedBackend::new());
        let events = Arc::new(ScriptedEvents::new());
        let queue = IngestQueue::new(
            &config,
            Arc::clone(&backend) as Arc<dyn IngestBackend>,
            Arc::clone(&events) as Arc<dyn EventSource>,
        );
        Self {
            queue,
            backend,
            events,
        }
    }

    pub fn submit_one(&self, source: SourceFile) -> String {
        self.queue
            .submit(vec![source])
            .expect("queue accepts files")
            .remove(0)
    }

    /// Waits until the item reaches `processing` with a file id, and its event
    /// stream is subscribed.
    pub async fn wait_processing(&self, id: &str) -> FileId {
        wait_for("item to reach processing", || {
            self.queue
                .get(id)
                .and_then(|item| item.backend_file_id)
                .is_some()
        })
        .await;
        let file_id = self
            .queue
            .get(id)
            .and_then(|item| item.backend_file_id)
            .expect("file id recorded");
        self.events.wait_subscribed(file_id).await;
        file_id
    }

    pub async fn wait_status(&self, id: &str, status: intake::ItemStatus) {
        wait_for(&format!("item to become {}", status), || {
            self.queue.get(id).is_some_and(|item| item.status == status)
        })
        .await;
    }
}

pub fn test_queue_config(max_concurrent: usize) -> QueueConfig {
    QueueConfig {
        max_concurrent,
        poll_interval_ms: TEST_POLL_INTERVAL_MS,
        ..QueueConfig::default()
    }
}

/// Polls `condition` until it holds, panicking after a generous timeout.
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Sleeps for a number of poll intervals.
pub async fn poll_intervals(n: u32) {
    tokio::time::sleep(Duration::from_millis(TEST_POLL_INTERVAL_MS) * n).await;
}
