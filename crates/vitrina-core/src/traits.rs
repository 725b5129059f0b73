//! Core traits for vitrina abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;
use crate::vector::EmbeddingVector;

// =============================================================================
// CATALOG REPOSITORY TRAITS
// =============================================================================

/// Repository for the catalog items the engine reads and annotates.
#[async_trait]
pub trait ItemRepository: Send + Sync {
    /// Insert a new item. Embedding and hash start empty.
    async fn insert(&self, req: CreateItemRequest) -> Result<Uuid>;

    /// Fetch an item by ID, including soft-deleted ones.
    async fn fetch(&self, id: Uuid) -> Result<Option<Item>>;

    /// List items matching a filter, oldest first.
    async fn list(&self, filter: &ItemFilter) -> Result<Vec<Item>>;

    /// Mark an item deleted. Its samples are kept.
    async fn soft_delete(&self, id: Uuid) -> Result<()>;

    /// Remove an item and, by cascade, all of its samples.
    async fn hard_delete(&self, id: Uuid) -> Result<()>;

    /// Replace the stored primary embedding wholesale.
    async fn set_primary_embedding(&self, id: Uuid, embedding: &EmbeddingVector) -> Result<()>;

    /// Clear the stored primary embedding (the photo changed).
    async fn clear_primary_embedding(&self, id: Uuid) -> Result<()>;

    /// Store the legacy perceptual hash.
    async fn set_image_hash(&self, id: Uuid, hash: &str) -> Result<()>;

    /// Clear the legacy hash (the photo is gone or unreadable).
    async fn clear_image_hash(&self, id: Uuid) -> Result<()>;
}

/// Repository for accepted item samples. Insert-only.
#[async_trait]
pub trait SampleRepository: Send + Sync {
    /// Load all samples belonging to any of the given items in one call.
    async fn list_for_items(&self, item_ids: &[Uuid]) -> Result<Vec<Sample>>;

    /// Persist a new sample for an item.
    async fn insert(&self, item_id: Uuid, embedding: &EmbeddingVector) -> Result<Sample>;

    /// Count samples stored for an item.
    async fn count_for_item(&self, item_id: Uuid) -> Result<i64>;
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Pretrained image encoder: encoded image bytes in, fixed-length vector out.
///
/// Implementations are shared behind an `Arc` across request handlers and
/// background jobs, so they must be safe for concurrent use once initialized.
#[async_trait]
pub trait ImageEncoder: Send + Sync {
    /// One-time warm-up (model info handshake, weight loading).
    ///
    /// Must be idempotent; concurrent callers observe a single initialization.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Encode one image (JPEG/PNG/WebP bytes) into a raw embedding.
    ///
    /// The output is not required to be unit length.
    async fn encode(&self, image: &[u8]) -> Result<Vec<f32>>;

    /// Expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Model name being used.
    fn model_name(&self) -> &str;
}

// =============================================================================
// PHOTO RETRIEVAL
// =============================================================================

/// Resolves an item's photo reference to raw image bytes.
#[async_trait]
pub trait PhotoSource: Send + Sync {
    /// `Ok(None)` when the item has no retrievable photo.
    async fn fetch(&self, item: &Item) -> Result<Option<Vec<u8>>>;
}
