//! Backfill runs over an in-memory catalog.

use std::sync::Arc;

use base64::Engine;
use vitrina_core::{ItemFilter, ItemRepository};
use vitrina_db::test_fixtures::ItemFixture;
use vitrina_db::MemoryCatalog;
use vitrina_inference::mock::{test_image_png, PixelEncoder};
use vitrina_inference::{dhash, EmbeddingExtractor};
use vitrina_jobs::{
    Backfill, BackfillConfig, BackfillReport, DataUriPhotoSource, FsPhotoSource, HttpPhotoSource,
    PhotoSourceChain,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIM: usize = 16;

fn data_uri(photo: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(photo)
    )
}

fn backfill(catalog: &MemoryCatalog, photos: Arc<dyn vitrina_core::PhotoSource>) -> Backfill {
    Backfill::new(
        Arc::new(catalog.clone()),
        EmbeddingExtractor::new(Arc::new(PixelEncoder::new(DIM))),
        photos,
    )
}

#[tokio::test]
async fn test_backfill_fills_missing_hashes_and_embeddings() {
    let catalog = MemoryCatalog::new();
    let photo = test_image_png(48, 48, 3);

    let fresh = ItemFixture::new("fresh").photo(&data_uri(&photo)).build();
    let no_photo = ItemFixture::new("no photo").build();
    let broken = ItemFixture::new("broken")
        .photo("data:image/png;base64,@@@")
        .build();
    let done = ItemFixture::new("done")
        .photo(&data_uri(&photo))
        .embedding(&[1.0; DIM])
        .hash("0000000000000000")
        .build();
    let fresh_id = fresh.id;
    for item in [fresh, no_photo, broken, done] {
        catalog.put_item(item).await;
    }

    let report = backfill(&catalog, Arc::new(DataUriPhotoSource))
        .run(&ItemFilter::new())
        .await
        .unwrap();

    assert_eq!(
        report,
        BackfillReport {
            processed: 3,
            embedded: 1,
            hashed: 1,
            skipped: 1,
            failed: 1,
        }
    );
    let item = catalog.fetch(fresh_id).await.unwrap().unwrap();
    assert_eq!(item.image_hash, Some(dhash(&photo).unwrap()));
    assert!(item.primary_embedding(DIM).unwrap().is_some());

    // a second run has nothing left but the items without usable photos
    let again = backfill(&catalog, Arc::new(DataUriPhotoSource))
        .run(&ItemFilter::new())
        .await
        .unwrap();
    assert_eq!(again.processed, 2);
    assert_eq!(again.embedded + again.hashed, 0);
}

#[tokio::test]
async fn test_hashes_only_leaves_embeddings_alone() {
    let catalog = MemoryCatalog::new();
    let photo = test_image_png(32, 32, 1);
    let item = ItemFixture::new("legacy").photo(&data_uri(&photo)).build();
    let id = item.id;
    catalog.put_item(item).await;

    let report = backfill(&catalog, Arc::new(DataUriPhotoSource))
        .with_config(BackfillConfig::default().hashes_only())
        .run(&ItemFilter::new())
        .await
        .unwrap();

    assert_eq!(report.hashed, 1);
    assert_eq!(report.embedded, 0);
    let item = catalog.fetch(id).await.unwrap().unwrap();
    assert!(item.image_hash.is_some());
    assert!(!item.has_embedding());
}

#[tokio::test]
async fn test_undecodable_photo_counts_as_failed() {
    let catalog = MemoryCatalog::new();
    let item = ItemFixture::new("junk").photo(&data_uri(b"junk bytes")).build();
    catalog.put_item(item).await;

    let report = backfill(&catalog, Arc::new(DataUriPhotoSource))
        .run(&ItemFilter::new())
        .await
        .unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.embedded + report.hashed, 0);
}

#[tokio::test]
async fn test_scope_filter_limits_items() {
    let catalog = MemoryCatalog::new();
    let photo = test_image_png(32, 32, 2);
    catalog
        .put_item(
            ItemFixture::new("rug")
                .category("rugs")
                .photo(&data_uri(&photo))
                .build(),
        )
        .await;
    catalog
        .put_item(
            ItemFixture::new("lamp")
                .category("lamps")
                .photo(&data_uri(&photo))
                .build(),
        )
        .await;

    let report = backfill(&catalog, Arc::new(DataUriPhotoSource))
        .run(&ItemFilter::new().with_category("lamps"))
        .await
        .unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.embedded, 1);
}

#[tokio::test]
async fn test_filesystem_photos_through_chain() {
    let dir = tempfile::tempdir().unwrap();
    let photo = test_image_png(40, 40, 6);
    std::fs::create_dir_all(dir.path().join("rugs")).unwrap();
    std::fs::write(dir.path().join("rugs/kashan.png"), &photo).unwrap();

    let catalog = MemoryCatalog::new();
    let on_disk = ItemFixture::new("on disk").photo("rugs/kashan.png").build();
    let inline = ItemFixture::new("inline").photo(&data_uri(&photo)).build();
    let missing = ItemFixture::new("missing").photo("rugs/gone.png").build();
    for item in [on_disk, inline, missing] {
        catalog.put_item(item).await;
    }

    let sources = PhotoSourceChain::new()
        .with(Arc::new(DataUriPhotoSource))
        .with(Arc::new(FsPhotoSource::new(dir.path())));
    let report = backfill(&catalog, Arc::new(sources))
        .run(&ItemFilter::new())
        .await
        .unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.embedded, 2);
    assert_eq!(report.hashed, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_photos_downloaded_over_http() {
    let server = MockServer::start().await;
    let photo = test_image_png(40, 40, 7);
    Mock::given(method("GET"))
        .and(path("/photos/tabriz.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(photo.clone()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/photos/sold.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/photos/flaky.png"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let catalog = MemoryCatalog::new();
    let remote = ItemFixture::new("remote")
        .photo(&format!("{}/photos/tabriz.png", server.uri()))
        .build();
    let remote_id = remote.id;
    let gone = ItemFixture::new("gone")
        .photo(&format!("{}/photos/sold.png", server.uri()))
        .build();
    let flaky = ItemFixture::new("flaky")
        .photo(&format!("{}/photos/flaky.png", server.uri()))
        .build();
    for item in [remote, gone, flaky] {
        catalog.put_item(item).await;
    }

    let sources = PhotoSourceChain::new()
        .with(Arc::new(DataUriPhotoSource))
        .with(Arc::new(HttpPhotoSource::new()))
        .with(Arc::new(FsPhotoSource::new(std::env::temp_dir())));
    let report = backfill(&catalog, Arc::new(sources))
        .run(&ItemFilter::new())
        .await
        .unwrap();

    assert_eq!(
        report,
        BackfillReport {
            processed: 3,
            embedded: 1,
            hashed: 1,
            skipped: 1,
            failed: 1,
        }
    );
    let item = catalog.fetch(remote_id).await.unwrap().unwrap();
    assert_eq!(item.image_hash, Some(dhash(&photo).unwrap()));
    assert!(item.has_embedding());
}
