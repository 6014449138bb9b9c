//! Packs pending ledger actions into one remote blob.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use vsort_cas::BlobStore;
use vsort_config::{log_batch_info, log_batch_warn, BatchConfig};
use vsort_ledger::{ActionLogEntry, Ledger};

use crate::processor::PipelineContext;

#[derive(Serialize)]
struct BatchPayload<'a> {
    batch_type: &'static str,
    timestamp: String,
    action_count: usize,
    actions: &'a [ActionLogEntry],
}

pub struct UploadBatcher {
    store: Arc<dyn BlobStore>,
    ledger: Ledger,
    threshold: usize,
    limit: usize,
}

impl UploadBatcher {
    pub fn new(store: Arc<dyn BlobStore>, ledger: Ledger, config: &BatchConfig) -> Self {
        Self {
            store,
            ledger,
            threshold: config.threshold.max(1),
            limit: config.limit.max(1),
        }
    }

    /// Flush once the session has moved `threshold` files since the last
    /// successful upload.
    pub fn maybe_flush(&self, ctx: &mut PipelineContext) -> Option<String> {
        if ctx.pending_uploads < self.threshold {
            return None;
        }
        self.flush(ctx)
    }

    /// Upload every pending action, `limit` per blob. Returns the last blob
    /// id, or `None` when nothing was uploaded. On a failed upload the
    /// remaining actions stay pending for the next trigger and the session
    /// counter is kept.
    pub fn flush(&self, ctx: &mut PipelineContext) -> Option<String> {
        let mut last = None;
        loop {
            match self.upload_chunk() {
                Chunk::Empty => break,
                Chunk::Uploaded(blob_id) => last = Some(blob_id),
                Chunk::Failed => return last,
            }
        }
        ctx.pending_uploads = 0;
        last
    }

    fn upload_chunk(&self) -> Chunk {
        let pending = match self.ledger.pending_actions(self.limit) {
            Ok(p) => p,
            Err(e) => {
                log_batch_warn!("Reading pending actions failed", error = %e);
                return Chunk::Failed;
            }
        };
        if pending.is_empty() {
            return Chunk::Empty;
        }

        let payload = BatchPayload {
            batch_type: "action_log",
            timestamp: Utc::now().to_rfc3339(),
            action_count: pending.len(),
            actions: &pending,
        };
        let body = match serde_json::to_vec(&payload) {
            Ok(b) => b,
            Err(e) => {
                log_batch_warn!("Encoding batch failed", error = %e);
                return Chunk::Failed;
            }
        };

        let blob_id = match self.store.put(&body) {
            Ok(id) => id,
            Err(e) => {
                log_batch_warn!("Batch upload failed, keeping actions pending", count = pending.len(), error = %e);
                return Chunk::Failed;
            }
        };

        let ids: Vec<u64> = pending.iter().map(|a| a.id).collect();
        if let Err(e) = self.ledger.mark_uploaded(&ids, &blob_id) {
            log_batch_warn!("Uploaded batch could not be marked", blob_id = %blob_id, error = %e);
            return Chunk::Failed;
        }
        log_batch_info!(
            "Batch uploaded",
            blob_id = %blob_id,
            count = ids.len(),
            url = %self.store.blob_url(&blob_id)
        );
        Chunk::Uploaded(blob_id)
    }
}

enum Chunk {
    Empty,
    Uploaded(String),
    Failed,
}
