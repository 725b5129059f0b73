//! Background indexing against an in-memory catalog.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;
use vitrina_core::{CreateItemRequest, EmbeddingVector, ImageEncoder, ItemRepository};
use vitrina_db::MemoryCatalog;
use vitrina_inference::mock::{test_image_png, FailingEncoder, PixelEncoder};
use vitrina_inference::{dhash, EmbeddingExtractor};
use vitrina_jobs::{CatalogIndexer, WorkerConfig, WorkerEvent, WorkerHandle};

const DIM: usize = 16;

fn indexer_with(
    catalog: &MemoryCatalog,
    encoder: Arc<dyn ImageEncoder>,
) -> (CatalogIndexer, WorkerHandle) {
    CatalogIndexer::start(
        Arc::new(catalog.clone()),
        EmbeddingExtractor::new(encoder),
        16,
        WorkerConfig::default().with_max_concurrent(2),
    )
}

async fn new_item(catalog: &MemoryCatalog) -> Uuid {
    catalog
        .insert(CreateItemRequest {
            branch_id: Uuid::nil(),
            name: "Tabriz 3x4".to_string(),
            category: "rugs".to_string(),
            collection: None,
            photo: None,
        })
        .await
        .unwrap()
}

/// Next completed, superseded or failed job event.
async fn next_terminal(events: &mut broadcast::Receiver<WorkerEvent>) -> WorkerEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await.unwrap() {
                e @ (WorkerEvent::JobCompleted { .. }
                | WorkerEvent::JobSuperseded { .. }
                | WorkerEvent::JobFailed { .. }) => return e,
                _ => continue,
            }
        }
    })
    .await
    .expect("no job finished in time")
}

#[tokio::test]
async fn test_embedding_is_eventually_persisted() {
    let catalog = MemoryCatalog::new();
    let (indexer, handle) = indexer_with(&catalog, Arc::new(PixelEncoder::new(DIM)));
    let mut events = handle.events();
    let id = new_item(&catalog).await;
    let photo = test_image_png(64, 48, 4);

    let receipt = indexer.on_item_saved(id, &photo).await.unwrap();

    // hash is synchronous
    let expected_hash = dhash(&photo).unwrap();
    assert_eq!(receipt.image_hash.as_deref(), Some(expected_hash.as_str()));
    let item = catalog.fetch(id).await.unwrap().unwrap();
    assert_eq!(item.image_hash.as_deref(), Some(expected_hash.as_str()));

    assert!(matches!(
        next_terminal(&mut events).await,
        WorkerEvent::JobCompleted { item_id, .. } if item_id == id
    ));
    let item = catalog.fetch(id).await.unwrap().unwrap();
    let stored = item.primary_embedding(DIM).unwrap().expect("embedding stored");
    assert_eq!(stored.dimension(), DIM);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_superseded_job_does_not_overwrite_newer_photo() {
    let catalog = MemoryCatalog::new();
    let encoder = PixelEncoder::new(DIM).with_latency(Duration::from_millis(150));
    let (indexer, handle) = indexer_with(&catalog, Arc::new(encoder));
    let mut events = handle.events();
    let id = new_item(&catalog).await;

    let old_photo = test_image_png(64, 64, 1);
    let new_photo = test_image_png(64, 64, 9);
    let first = indexer.on_item_saved(id, &old_photo).await.unwrap();
    let second = indexer.on_item_saved(id, &new_photo).await.unwrap();
    assert_ne!(first.job_id, second.job_id);

    let mut outcomes = vec![
        next_terminal(&mut events).await,
        next_terminal(&mut events).await,
    ];
    outcomes.sort_by_key(|e| matches!(e, WorkerEvent::JobCompleted { .. }));
    assert!(matches!(
        outcomes[0],
        WorkerEvent::JobSuperseded { job_id, .. } if Some(job_id) == first.job_id
    ));
    assert!(matches!(
        outcomes[1],
        WorkerEvent::JobCompleted { job_id, .. } if Some(job_id) == second.job_id
    ));

    let expected = EmbeddingExtractor::new(Arc::new(PixelEncoder::new(DIM)))
        .try_extract(&new_photo)
        .await
        .unwrap();
    let item = catalog.fetch(id).await.unwrap().unwrap();
    assert_eq!(item.primary_embedding(DIM).unwrap(), Some(expected));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resubmitting_pending_photo_is_deduplicated() {
    let catalog = MemoryCatalog::new();
    let encoder = PixelEncoder::new(DIM).with_latency(Duration::from_millis(100));
    let (indexer, handle) = indexer_with(&catalog, Arc::new(encoder));
    let mut events = handle.events();
    let id = new_item(&catalog).await;
    let photo = test_image_png(32, 32, 3);

    let first = indexer.on_item_saved(id, &photo).await.unwrap();
    let again = indexer.on_item_saved(id, &photo).await.unwrap();
    assert!(again.deduplicated);
    assert_eq!(again.job_id, first.job_id);

    assert!(matches!(
        next_terminal(&mut events).await,
        WorkerEvent::JobCompleted { .. }
    ));
    assert_eq!(indexer.queue().pending_count(), 0);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_model_failure_is_reported_on_event_channel_only() {
    let catalog = MemoryCatalog::new();
    let (indexer, handle) = indexer_with(&catalog, Arc::new(FailingEncoder::new(DIM)));
    let mut events = handle.events();
    let id = new_item(&catalog).await;

    let receipt = indexer
        .on_item_saved(id, &test_image_png(32, 32, 2))
        .await
        .unwrap();
    assert!(receipt.image_hash.is_some());
    assert!(receipt.job_id.is_some());

    match next_terminal(&mut events).await {
        WorkerEvent::JobFailed { item_id, error, .. } => {
            assert_eq!(item_id, id);
            assert!(error.contains("unavailable"), "{}", error);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(!catalog.fetch(id).await.unwrap().unwrap().has_embedding());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_undecodable_photo_saves_without_hash() {
    let catalog = MemoryCatalog::new();
    let (indexer, handle) = indexer_with(&catalog, Arc::new(PixelEncoder::new(DIM)));
    let mut events = handle.events();
    let id = new_item(&catalog).await;

    let receipt = indexer.on_item_saved(id, b"not a photo").await.unwrap();
    assert!(receipt.image_hash.is_none());
    assert!(matches!(
        next_terminal(&mut events).await,
        WorkerEvent::JobFailed { .. }
    ));

    let item = catalog.fetch(id).await.unwrap().unwrap();
    assert!(item.image_hash.is_none());
    assert!(!item.has_embedding());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreadable_replacement_photo_clears_previous_data() {
    let catalog = MemoryCatalog::new();
    let (indexer, handle) = indexer_with(&catalog, Arc::new(PixelEncoder::new(DIM)));
    let mut events = handle.events();
    let id = new_item(&catalog).await;

    indexer
        .on_item_saved(id, &test_image_png(48, 48, 2))
        .await
        .unwrap();
    assert!(matches!(
        next_terminal(&mut events).await,
        WorkerEvent::JobCompleted { .. }
    ));
    let item = catalog.fetch(id).await.unwrap().unwrap();
    assert!(item.has_embedding());
    assert!(item.image_hash.is_some());

    let receipt = indexer.on_item_saved(id, b"junk").await.unwrap();
    assert!(receipt.image_hash.is_none());
    // cleared before the hook returns
    let item = catalog.fetch(id).await.unwrap().unwrap();
    assert!(item.image_hash.is_none());
    assert!(!item.has_embedding());

    assert!(matches!(
        next_terminal(&mut events).await,
        WorkerEvent::JobFailed { .. }
    ));
    let item = catalog.fetch(id).await.unwrap().unwrap();
    assert!(item.image_hash.is_none());
    assert!(!item.has_embedding());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_embedding_of_new_photo_clears_old_embedding() {
    let catalog = MemoryCatalog::new();
    let (indexer, handle) = indexer_with(&catalog, Arc::new(FailingEncoder::new(DIM)));
    let mut events = handle.events();
    let id = new_item(&catalog).await;
    let old = EmbeddingVector::new(vec![1.0; DIM]).unwrap();
    catalog.set_primary_embedding(id, &old).await.unwrap();

    let new_photo = test_image_png(48, 48, 6);
    let receipt = indexer.on_item_saved(id, &new_photo).await.unwrap();
    assert_eq!(receipt.image_hash, Some(dhash(&new_photo).unwrap()));

    assert!(matches!(
        next_terminal(&mut events).await,
        WorkerEvent::JobFailed { .. }
    ));
    let item = catalog.fetch(id).await.unwrap().unwrap();
    assert!(!item.has_embedding());
    assert_eq!(item.image_hash, receipt.image_hash);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resubmission_after_shutdown_is_not_deduplicated() {
    let catalog = MemoryCatalog::new();
    let encoder = PixelEncoder::new(DIM).with_latency(Duration::from_millis(100));
    let (indexer, handle) = indexer_with(&catalog, Arc::new(encoder));
    let id = new_item(&catalog).await;
    let photo = test_image_png(32, 32, 4);

    indexer.on_item_saved(id, &photo).await.unwrap();
    handle.shutdown().await.unwrap();
    assert_eq!(indexer.queue().pending_count(), 0);

    let again = indexer.on_item_saved(id, &photo).await.unwrap();
    assert!(!again.deduplicated);
    assert!(again.job_id.is_none());
}

#[tokio::test]
async fn test_photo_removal_clears_embedding() {
    let catalog = MemoryCatalog::new();
    let (indexer, handle) = indexer_with(&catalog, Arc::new(PixelEncoder::new(DIM)));
    let mut events = handle.events();
    let id = new_item(&catalog).await;

    indexer
        .on_item_saved(id, &test_image_png(32, 32, 5))
        .await
        .unwrap();
    next_terminal(&mut events).await;
    assert!(catalog.fetch(id).await.unwrap().unwrap().has_embedding());

    indexer.on_photo_removed(id).await.unwrap();
    let item = catalog.fetch(id).await.unwrap().unwrap();
    assert!(!item.has_embedding());
    assert!(item.image_hash.is_none());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_item_is_an_error() {
    let catalog = MemoryCatalog::new();
    let (indexer, handle) = indexer_with(&catalog, Arc::new(PixelEncoder::new(DIM)));
    assert!(indexer
        .on_item_saved(Uuid::new_v4(), &test_image_png(16, 16, 1))
        .await
        .is_err());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_inline_compute_persists_embedding() {
    let catalog = MemoryCatalog::new();
    let (indexer, handle) = indexer_with(&catalog, Arc::new(PixelEncoder::new(DIM)));
    let id = new_item(&catalog).await;

    let embedding = indexer
        .compute_primary_embedding(id, &test_image_png(40, 30, 8))
        .await
        .unwrap();
    let item = catalog.fetch(id).await.unwrap().unwrap();
    assert_eq!(item.primary_embedding(DIM).unwrap(), Some(embedding));

    assert!(indexer
        .compute_primary_embedding(id, b"junk")
        .await
        .is_err());
    handle.shutdown().await.unwrap();
}
