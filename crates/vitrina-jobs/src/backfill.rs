//! Backfill of missing hashes and primary embeddings.
//!
//! Walks catalog items that lack an embedding or a legacy hash, fetches
//! their photo through a [`PhotoSource`], and fills in whatever is missing.
//! Failures are counted per item and never abort the run.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use vitrina_core::defaults::{self, env_or, BACKFILL_CONCURRENCY, PHOTO_FETCH_TIMEOUT_SECS};
use vitrina_core::{Error, Item, ItemFilter, ItemRepository, PhotoSource, Result};
use vitrina_inference::EmbeddingExtractor;

use crate::indexer::{compute_primary_embedding, hash_photo};

/// Counters reported by [`Backfill::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Items that needed work.
    pub processed: usize,
    /// Primary embeddings written.
    pub embedded: usize,
    /// Legacy hashes written.
    pub hashed: usize,
    /// Items without a retrievable photo.
    pub skipped: usize,
    /// Items where at least one step failed.
    pub failed: usize,
}

impl BackfillReport {
    fn absorb(&mut self, outcome: ItemOutcome) {
        self.processed += 1;
        self.embedded += outcome.embedded as usize;
        self.hashed += outcome.hashed as usize;
        self.skipped += outcome.skipped as usize;
        self.failed += outcome.failed as usize;
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ItemOutcome {
    embedded: bool,
    hashed: bool,
    skipped: bool,
    failed: bool,
}

/// What a backfill run fills in.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub embeddings: bool,
    pub hashes: bool,
    /// Items processed at once.
    pub concurrency: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            embeddings: true,
            hashes: true,
            concurrency: BACKFILL_CONCURRENCY,
        }
    }
}

impl BackfillConfig {
    pub fn from_env() -> Self {
        Self {
            concurrency: env_or(defaults::ENV_BACKFILL_CONCURRENCY, BACKFILL_CONCURRENCY).max(1),
            ..Self::default()
        }
    }

    pub fn embeddings_only(mut self) -> Self {
        self.hashes = false;
        self
    }

    pub fn hashes_only(mut self) -> Self {
        self.embeddings = false;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// Fills in missing hashes and embeddings for existing items.
pub struct Backfill {
    items: Arc<dyn ItemRepository>,
    extractor: EmbeddingExtractor,
    photos: Arc<dyn PhotoSource>,
    config: BackfillConfig,
}

impl Backfill {
    pub fn new(
        items: Arc<dyn ItemRepository>,
        extractor: EmbeddingExtractor,
        photos: Arc<dyn PhotoSource>,
    ) -> Self {
        Self {
            items,
            extractor,
            photos,
            config: BackfillConfig::default(),
        }
    }

    pub fn with_config(mut self, config: BackfillConfig) -> Self {
        self.config = config;
        self
    }

    /// Process every item selected by `scope` that is missing something.
    pub async fn run(&self, scope: &ItemFilter) -> Result<BackfillReport> {
        let start = Instant::now();
        let candidates: Vec<Item> = self
            .items
            .list(scope)
            .await?
            .into_iter()
            .filter(|item| self.needs_work(item))
            .collect();

        info!(
            subsystem = "jobs",
            component = "backfill",
            candidate_count = candidates.len(),
            embeddings = self.config.embeddings,
            hashes = self.config.hashes,
            "Backfill started"
        );

        let report = stream::iter(candidates)
            .map(|item| self.process(item))
            .buffer_unordered(self.config.concurrency.max(1))
            .fold(BackfillReport::default(), |mut report, outcome| async move {
                report.absorb(outcome);
                report
            })
            .await;

        info!(
            subsystem = "jobs",
            component = "backfill",
            processed = report.processed,
            embedded = report.embedded,
            hashed = report.hashed,
            skipped = report.skipped,
            failed = report.failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Backfill finished"
        );
        Ok(report)
    }

    fn needs_work(&self, item: &Item) -> bool {
        (self.config.embeddings && !item.has_embedding())
            || (self.config.hashes && item.image_hash.is_none())
    }

    async fn process(&self, item: Item) -> ItemOutcome {
        let mut outcome = ItemOutcome::default();

        let photo = match self.photos.fetch(&item).await {
            Ok(Some(photo)) => photo,
            Ok(None) => {
                debug!(
                    subsystem = "jobs",
                    component = "backfill",
                    item_id = %item.id,
                    "No photo, skipping"
                );
                outcome.skipped = true;
                return outcome;
            }
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "backfill",
                    item_id = %item.id,
                    error = %e,
                    "Photo fetch failed"
                );
                outcome.failed = true;
                return outcome;
            }
        };

        if self.config.hashes && item.image_hash.is_none() {
            let stored = match hash_photo(&photo).await {
                Ok(hash) => self.items.set_image_hash(item.id, &hash).await,
                Err(e) => Err(e),
            };
            match stored {
                Ok(()) => outcome.hashed = true,
                Err(e) => {
                    warn!(
                        subsystem = "jobs",
                        component = "backfill",
                        item_id = %item.id,
                        error = %e,
                        "Hash backfill failed"
                    );
                    outcome.failed = true;
                }
            }
        }

        if self.config.embeddings && !item.has_embedding() {
            match compute_primary_embedding(self.items.as_ref(), &self.extractor, item.id, &photo)
                .await
            {
                Ok(_) => outcome.embedded = true,
                Err(e) => {
                    warn!(
                        subsystem = "jobs",
                        component = "backfill",
                        item_id = %item.id,
                        error = %e,
                        "Embedding backfill failed"
                    );
                    outcome.failed = true;
                }
            }
        }
        outcome
    }
}

// =============================================================================
// PHOTO SOURCES
// =============================================================================

/// Resolves `data:image/...;base64,...` photo references.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataUriPhotoSource;

impl DataUriPhotoSource {
    /// Decode a data URI. `Ok(None)` when `reference` is not a data URI.
    pub fn decode(reference: &str) -> Result<Option<Vec<u8>>> {
        let Some(rest) = reference.strip_prefix("data:") else {
            return Ok(None);
        };
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| Error::InvalidInput("data URI without payload".to_string()))?;
        if !meta.starts_with("image/") {
            return Err(Error::InvalidInput(format!(
                "data URI is not an image: {}",
                meta
            )));
        }
        if !meta.ends_with(";base64") {
            return Err(Error::InvalidInput(
                "only base64 data URIs are supported".to_string(),
            ));
        }
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("invalid base64 photo: {}", e)))
    }
}

#[async_trait]
impl PhotoSource for DataUriPhotoSource {
    async fn fetch(&self, item: &Item) -> Result<Option<Vec<u8>>> {
        match item.photo.as_deref() {
            Some(reference) => Self::decode(reference),
            None => Ok(None),
        }
    }
}

/// Resolves relative photo paths under a root directory.
#[derive(Debug, Clone)]
pub struct FsPhotoSource {
    root: PathBuf,
}

impl FsPhotoSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf> {
        let relative = Path::new(reference);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(Error::InvalidInput(format!(
                "photo path escapes the photo root: {}",
                reference
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl PhotoSource for FsPhotoSource {
    async fn fetch(&self, item: &Item) -> Result<Option<Vec<u8>>> {
        let Some(reference) = item.photo.as_deref() else {
            return Ok(None);
        };
        if reference.starts_with("data:") || is_http_url(reference) {
            return Ok(None);
        }
        let path = self.resolve(reference)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_http_url(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

/// Downloads `http://` and `https://` photo references.
///
/// A 404 or 410 means the photo is gone and the item is skipped; any other
/// failure status is an error.
#[derive(Debug, Clone)]
pub struct HttpPhotoSource {
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for HttpPhotoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpPhotoSource {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(PHOTO_FETCH_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl PhotoSource for HttpPhotoSource {
    async fn fetch(&self, item: &Item) -> Result<Option<Vec<u8>>> {
        let Some(url) = item.photo.as_deref().filter(|r| is_http_url(r)) else {
            return Ok(None);
        };
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            debug!(
                subsystem = "jobs",
                component = "photo_source",
                item_id = %item.id,
                status = status.as_u16(),
                "Photo URL is gone"
            );
            return Ok(None);
        }
        let bytes = response.error_for_status()?.bytes().await?;
        Ok(Some(bytes.to_vec()))
    }
}

/// Tries each source in order and returns the first photo found.
#[derive(Clone, Default)]
pub struct PhotoSourceChain {
    sources: Vec<Arc<dyn PhotoSource>>,
}

impl PhotoSourceChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: Arc<dyn PhotoSource>) -> Self {
        self.sources.push(source);
        self
    }
}

#[async_trait]
impl PhotoSource for PhotoSourceChain {
    async fn fetch(&self, item: &Item) -> Result<Option<Vec<u8>>> {
        for source in &self.sources {
            if let Some(photo) = source.fetch(item).await? {
                return Ok(Some(photo));
            }
        }
        Ok(None)
    }
}
