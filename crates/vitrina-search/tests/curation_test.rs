//! Sample curation gates against an in-memory catalog.

use std::sync::Arc;

use uuid::Uuid;
use vitrina_core::{encode_f32_le, Error, RejectReason, SampleOutcome, SampleRepository};
use vitrina_db::test_fixtures::{axis_vector, ItemFixture};
use vitrina_db::MemoryCatalog;
use vitrina_inference::mock::{test_image_png, FailingEncoder, FixedEncoder};
use vitrina_inference::{EmbeddingExtractor, ExtractorConfig};
use vitrina_search::{CurationGates, SampleCurator};

const DIM: usize = 8;

/// Curator whose extractor always yields the unit vector on axis 0.
fn curator(catalog: &MemoryCatalog) -> SampleCurator {
    let encoder = Arc::new(FixedEncoder::new(axis_vector(1.0, DIM)));
    let extractor = EmbeddingExtractor::new(encoder).with_config(
        ExtractorConfig::default()
            .with_dimension(DIM)
            .with_weights(0.5, 0.5),
    );
    SampleCurator::new(
        Arc::new(catalog.clone()),
        Arc::new(catalog.clone()),
        extractor,
    )
}

async fn seed_item(catalog: &MemoryCatalog, primary_cosine: f32) -> Uuid {
    let item = ItemFixture::new("Kashan runner")
        .embedding(&axis_vector(primary_cosine, DIM))
        .build();
    let id = item.id;
    catalog.put_item(item).await;
    id
}

fn photo() -> Vec<u8> {
    test_image_png(48, 48, 2)
}

#[tokio::test]
async fn test_rejects_low_similarity_at_059() {
    let catalog = MemoryCatalog::new();
    let id = seed_item(&catalog, 0.59).await;

    let outcome = curator(&catalog).propose_sample(id, &photo()).await.unwrap();
    match outcome.reject_reason() {
        Some(RejectReason::LowSimilarity { similarity }) => {
            assert!((similarity - 0.59).abs() < 1e-5)
        }
        other => panic!("expected low_similarity, got {:?}", other),
    }
    assert_eq!(catalog.count_for_item(id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_accepts_at_061() {
    let catalog = MemoryCatalog::new();
    let id = seed_item(&catalog, 0.61).await;

    let outcome = curator(&catalog).propose_sample(id, &photo()).await.unwrap();
    assert!(outcome.is_accepted());
    assert_eq!(catalog.count_for_item(id).await.unwrap(), 1);
}

async fn propose_against_sample(existing_cosine: f32) -> SampleOutcome {
    let catalog = MemoryCatalog::new();
    let id = seed_item(&catalog, 1.0).await;
    catalog
        .put_raw_sample(id, encode_f32_le(&axis_vector(existing_cosine, DIM)))
        .await
        .unwrap();
    curator(&catalog).propose_sample(id, &photo()).await.unwrap()
}

#[tokio::test]
async fn test_duplicate_gate_boundaries() {
    assert!(propose_against_sample(0.94).await.is_accepted());
    assert!(propose_against_sample(0.95).await.is_accepted());

    let outcome = propose_against_sample(0.96).await;
    assert!(matches!(
        outcome,
        SampleOutcome::Rejected(RejectReason::Duplicate { .. })
    ));
}

#[tokio::test]
async fn test_second_identical_proposal_is_duplicate() {
    let catalog = MemoryCatalog::new();
    let id = seed_item(&catalog, 0.9).await;
    let curator = curator(&catalog);

    assert!(curator.propose_sample(id, &photo()).await.unwrap().is_accepted());
    let second = curator.propose_sample(id, &photo()).await.unwrap();
    assert!(matches!(
        second,
        SampleOutcome::Rejected(RejectReason::Duplicate { .. })
    ));
    assert_eq!(catalog.count_for_item(id).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_proposals_store_one_sample() {
    let catalog = MemoryCatalog::new();
    let id = seed_item(&catalog, 0.9).await;
    let curator = curator(&catalog);

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let curator = curator.clone();
        tasks.push(tokio::spawn(async move {
            curator.propose_sample(id, &photo()).await.unwrap()
        }));
    }
    let mut accepted = 0;
    for task in tasks {
        match task.await.unwrap() {
            SampleOutcome::Accepted(_) => accepted += 1,
            SampleOutcome::Rejected(RejectReason::Duplicate { .. }) => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(catalog.count_for_item(id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_undecodable_photo_is_rejected_not_error() {
    let catalog = MemoryCatalog::new();
    let id = seed_item(&catalog, 1.0).await;

    let outcome = curator(&catalog)
        .propose_sample(id, b"definitely not an image")
        .await
        .unwrap();
    assert_eq!(outcome, SampleOutcome::Rejected(RejectReason::Unprocessable));
}

#[tokio::test]
async fn test_model_unavailable_is_rejected_unprocessable() {
    let catalog = MemoryCatalog::new();
    let id = seed_item(&catalog, 1.0).await;
    let extractor = EmbeddingExtractor::new(Arc::new(FailingEncoder::new(DIM)));
    let curator = SampleCurator::new(
        Arc::new(catalog.clone()),
        Arc::new(catalog.clone()),
        extractor,
    );

    let outcome = curator.propose_sample(id, &photo()).await.unwrap();
    assert_eq!(outcome, SampleOutcome::Rejected(RejectReason::Unprocessable));
}

#[tokio::test]
async fn test_unknown_and_deleted_items_are_not_found() {
    let catalog = MemoryCatalog::new();
    let missing = Uuid::new_v4();
    let err = curator(&catalog)
        .propose_sample(missing, &photo())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ItemNotFound(id) if id == missing));

    let deleted = ItemFixture::new("gone").deleted().build();
    let deleted_id = deleted.id;
    catalog.put_item(deleted).await;
    let err = curator(&catalog)
        .propose_sample(deleted_id, &photo())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ItemNotFound(_)));
}

#[tokio::test]
async fn test_corrupt_primary_is_treated_as_absent() {
    let catalog = MemoryCatalog::new();
    let item = ItemFixture::new("damaged")
        .raw_embedding(vec![0u8; 13])
        .build();
    let id = item.id;
    catalog.put_item(item).await;

    let outcome = curator(&catalog).propose_sample(id, &photo()).await.unwrap();
    assert!(outcome.is_accepted());
}

#[tokio::test]
async fn test_corrupt_samples_are_skipped() {
    let catalog = MemoryCatalog::new();
    let id = seed_item(&catalog, 1.0).await;
    catalog.put_raw_sample(id, vec![1, 2, 3]).await.unwrap();

    let outcome = curator(&catalog).propose_sample(id, &photo()).await.unwrap();
    assert!(outcome.is_accepted());
    assert_eq!(catalog.count_for_item(id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_custom_gates_apply() {
    let catalog = MemoryCatalog::new();
    let id = seed_item(&catalog, 0.75).await;
    let strict = curator(&catalog).with_gates(CurationGates::default().with_min_similarity(0.8));

    let outcome = strict.propose_sample(id, &photo()).await.unwrap();
    assert!(matches!(
        outcome.reject_reason(),
        Some(RejectReason::LowSimilarity { .. })
    ));
}
