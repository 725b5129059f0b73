//! Catalog indexing hooks.
//!
//! Saving an item with a photo stores its legacy hash right away and defers
//! the primary embedding to the background worker. Callers never wait for
//! the embedding; a failure there is logged and reported on the worker's
//! event channel only.
//!
//! Hash and embedding always describe the current photo. Until the new
//! embedding is stored the previous one keeps serving searches; if the new
//! photo cannot be hashed or embedded, the stale value is cleared instead.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vitrina_core::{EmbeddingVector, Error, ItemRepository, Result};
use vitrina_inference::{dhash, EmbeddingExtractor};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::queue::IndexQueue;
use crate::worker::{JobWorker, WorkerConfig, WorkerHandle};

/// Compute the legacy hash on the blocking pool.
pub(crate) async fn hash_photo(image: &[u8]) -> Result<String> {
    let bytes = image.to_vec();
    tokio::task::spawn_blocking(move || dhash(&bytes))
        .await
        .map_err(|e| Error::Internal(format!("hash task failed: {}", e)))?
}

/// Extract the primary embedding of an item's photo and persist it.
///
/// An unusable photo or an unavailable model is an error here: the caller
/// is a background job, and the item simply stays without an embedding.
pub async fn compute_primary_embedding(
    items: &dyn ItemRepository,
    extractor: &EmbeddingExtractor,
    item_id: Uuid,
    image: &[u8],
) -> Result<EmbeddingVector> {
    let embedding = extractor.try_extract(image).await?;
    items.set_primary_embedding(item_id, &embedding).await?;
    Ok(embedding)
}

/// Handler computing primary embeddings for queued photos.
pub struct PrimaryEmbeddingHandler {
    items: Arc<dyn ItemRepository>,
    extractor: EmbeddingExtractor,
}

impl PrimaryEmbeddingHandler {
    pub fn new(items: Arc<dyn ItemRepository>, extractor: EmbeddingExtractor) -> Self {
        Self { items, extractor }
    }
}

#[async_trait]
impl JobHandler for PrimaryEmbeddingHandler {
    fn name(&self) -> &'static str {
        "primary_embedding"
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        if ctx.is_superseded() {
            return JobResult::Superseded;
        }

        let embedding = match self.extractor.try_extract(ctx.image()).await {
            Ok(embedding) => embedding,
            Err(e) => return JobResult::Failed(e.to_string()),
        };

        let Some(_commit) = ctx.lock_if_current().await else {
            return JobResult::Superseded;
        };
        match self
            .items
            .set_primary_embedding(ctx.item_id(), &embedding)
            .await
        {
            Ok(()) => JobResult::Success,
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }

    async fn on_failure(&self, ctx: &JobContext, _error: &str) {
        // the stored embedding belongs to a photo the item no longer has
        let Some(_commit) = ctx.lock_if_current().await else {
            return;
        };
        match self.items.clear_primary_embedding(ctx.item_id()).await {
            Ok(()) => debug!(
                subsystem = "jobs",
                component = "indexer",
                item_id = %ctx.item_id(),
                job_id = %ctx.job.id,
                "Stale primary embedding cleared after failed job"
            ),
            Err(e) => warn!(
                subsystem = "jobs",
                component = "indexer",
                item_id = %ctx.item_id(),
                error = %e,
                "Could not clear stale primary embedding"
            ),
        }
    }
}

/// What `on_item_saved` did synchronously.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReceipt {
    pub item_id: Uuid,
    /// The stored legacy hash, when the photo could be decoded.
    pub image_hash: Option<String>,
    /// The scheduled embedding job, when the queue accepted it.
    pub job_id: Option<Uuid>,
    pub deduplicated: bool,
}

/// Hooks run by whatever saves catalog items.
#[derive(Clone)]
pub struct CatalogIndexer {
    items: Arc<dyn ItemRepository>,
    extractor: EmbeddingExtractor,
    queue: IndexQueue,
}

impl CatalogIndexer {
    pub fn new(
        items: Arc<dyn ItemRepository>,
        extractor: EmbeddingExtractor,
        queue: IndexQueue,
    ) -> Self {
        Self {
            items,
            extractor,
            queue,
        }
    }

    /// Build the queue, the embedding worker and the indexer in one go.
    pub fn start(
        items: Arc<dyn ItemRepository>,
        extractor: EmbeddingExtractor,
        queue_capacity: usize,
        config: WorkerConfig,
    ) -> (Self, WorkerHandle) {
        let (queue, receiver) = IndexQueue::bounded(queue_capacity);
        let handler = Arc::new(PrimaryEmbeddingHandler::new(
            items.clone(),
            extractor.clone(),
        ));
        let handle = JobWorker::new(receiver, queue.clone(), handler, config).start();
        (Self::new(items, extractor, queue), handle)
    }

    pub fn queue(&self) -> &IndexQueue {
        &self.queue
    }

    /// Index a newly saved or re-photographed item.
    ///
    /// Stores the legacy hash before returning and schedules the primary
    /// embedding. Only repository errors are returned. An undecodable photo
    /// clears the hash and embedding derived from the previous photo; it and
    /// a full queue are logged and reflected in the receipt.
    pub async fn on_item_saved(&self, item_id: Uuid, photo: &[u8]) -> Result<IndexReceipt> {
        let start = Instant::now();

        let image_hash = match hash_photo(photo).await {
            Ok(hash) => {
                self.items.set_image_hash(item_id, &hash).await?;
                Some(hash)
            }
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "indexer",
                    op = "on_item_saved",
                    item_id = %item_id,
                    error = %e,
                    "Photo cannot be hashed"
                );
                self.forget_photo(item_id).await?;
                None
            }
        };

        let scheduled = match self.queue.schedule(item_id, photo.to_vec()) {
            Ok(scheduled) => Some(scheduled),
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "indexer",
                    op = "on_item_saved",
                    item_id = %item_id,
                    error = %e,
                    "Primary embedding not scheduled"
                );
                None
            }
        };

        debug!(
            subsystem = "jobs",
            component = "indexer",
            op = "on_item_saved",
            item_id = %item_id,
            hashed = image_hash.is_some(),
            scheduled = scheduled.is_some(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Item indexing hook done"
        );
        Ok(IndexReceipt {
            item_id,
            image_hash,
            job_id: scheduled.map(|s| s.job_id),
            deduplicated: scheduled.is_some_and(|s| s.deduplicated),
        })
    }

    /// The item's photo was removed: drop pending work and the stale
    /// embedding.
    pub async fn on_photo_removed(&self, item_id: Uuid) -> Result<()> {
        self.forget_photo(item_id).await?;
        info!(
            subsystem = "jobs",
            component = "indexer",
            item_id = %item_id,
            "Primary embedding and hash cleared"
        );
        Ok(())
    }

    /// Cancel in-flight work for the item and clear everything derived from
    /// its previous photo.
    async fn forget_photo(&self, item_id: Uuid) -> Result<()> {
        self.queue.supersede(item_id);
        let _commit = self.queue.commit_lock().await;
        self.items.clear_primary_embedding(item_id).await?;
        self.items.clear_image_hash(item_id).await
    }

    /// Compute and persist the primary embedding inline.
    pub async fn compute_primary_embedding(
        &self,
        item_id: Uuid,
        image: &[u8],
    ) -> Result<EmbeddingVector> {
        compute_primary_embedding(self.items.as_ref(), &self.extractor, item_id, image).await
    }
}
