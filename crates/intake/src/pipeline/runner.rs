use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::backend::{CreateRecordRequest, IngestBackend};
use crate::monitor::CompletionMonitor;
use crate::queue::item::{FileId, SourceFile};
use crate::store::{Observed, StatusStore, WriteOutcome};

use super::error::{Stage, StageError};

/// Drives one item attempt through upload, record creation and the
/// processing trigger, then hands it to the [`CompletionMonitor`].
pub struct Pipeline {
    backend: Arc<dyn IngestBackend>,
    store: Arc<StatusStore>,
    monitor: CompletionMonitor,
    folder_id: Option<i64>,
}

impl Pipeline {
    pub fn new(
        backend: Arc<dyn IngestBackend>,
        store: Arc<StatusStore>,
        monitor: CompletionMonitor,
        folder_id: Option<i64>,
    ) -> Self {
        Self {
            backend,
            store,
            monitor,
            folder_id,
        }
    }

    /// Runs the pipeline for one attempt of an item.
    ///
    /// A stage failure is recorded on the item and returned. `Abandoned`
    /// means the item was removed, retried or torn down while a stage was in
    /// flight; nothing is written in that case.
    pub async fn run(
        &self,
        id: &str,
        attempt: u32,
        source: &SourceFile,
    ) -> Result<FileId, StageError> {
        let span = info_span!("pipeline", item_id = %id, attempt, filename = %source.log_name());

        async {
            let result = self.run_stages(id, attempt, source).await;
            match &result {
                Ok(file_id) => info!(file_id, "Processing started, monitoring completion"),
                Err(StageError::Abandoned) => debug!("Item abandoned mid-pipeline"),
                Err(e) => {
                    warn!(error = %e, "Pipeline stage failed");
                    self.store.fail(id, attempt, &e.item_message(), Observed::Local);
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        id: &str,
        attempt: u32,
        source: &SourceFile,
    ) -> Result<FileId, StageError> {
        // Step 1: Upload
        guard(self.store.begin_upload(id, attempt))?;
        let receipt = self
            .backend
            .upload_blob(source)
            .instrument(info_span!("upload", size = source.size))
            .await
            .map_err(|e| StageError::failed(Stage::Upload, e))?;
        guard(self.store.upload_succeeded(id, attempt, &receipt.storage_key))?;

        // Step 2: Create record
        let request = CreateRecordRequest::for_source(source, &receipt.storage_key, self.folder_id);
        let record = self
            .backend
            .create_record(&request)
            .instrument(info_span!("create_record"))
            .await
            .map_err(|e| StageError::failed(Stage::CreateRecord, e))?;
        guard(self.store.record_created(id, attempt, record.file_id))?;

        // Step 3: Trigger processing and hand off
        self.trigger(record.file_id);
        guard(self.monitor.watch(id, attempt, record.file_id))?;

        Ok(record.file_id)
    }

    /// Fires the processing trigger without waiting on it. Its outcome only
    /// gets logged; completion is decided by the monitor.
    fn trigger(&self, file_id: FileId) {
        let backend = Arc::clone(&self.backend);
        tokio::spawn(
            async move {
                match backend.trigger_processing(file_id).await {
                    Ok(receipt) => debug!(status = %receipt.status, "Processing triggered"),
                    Err(e) => warn!(error = %e, "Processing trigger failed"),
                }
            }
            .instrument(info_span!("trigger_processing", file_id)),
        );
    }
}

fn guard(outcome: WriteOutcome) -> Result<(), StageError> {
    match outcome {
        WriteOutcome::Applied => Ok(()),
        WriteOutcome::Stale => Err(StageError::Abandoned),
    }
}
