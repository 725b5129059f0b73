//! In-memory catalog implementing both repository traits.
//!
//! Used by tests across the workspace and by tooling that runs without a
//! database. Semantics follow the PostgreSQL repositories: listing is
//! ordered by creation, deleting an item cascades to its samples.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use vitrina_core::{
    CreateItemRequest, EmbeddingVector, Error, Item, ItemFilter, ItemRepository, Result, Sample,
    SampleRepository,
};

#[derive(Default)]
struct CatalogState {
    /// Items in insertion order.
    items: Vec<Item>,
    samples: HashMap<Uuid, Vec<Sample>>,
}

impl CatalogState {
    fn item_mut(&mut self, id: Uuid) -> Result<&mut Item> {
        self.items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(Error::ItemNotFound(id))
    }
}

/// Shared, cloneable in-memory catalog.
#[derive(Clone, Default)]
pub struct MemoryCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a fully formed item, including raw embedding bytes.
    pub async fn put_item(&self, item: Item) {
        let mut state = self.state.write().await;
        state.items.retain(|i| i.id != item.id);
        state.items.push(item);
    }

    /// Seed a sample with arbitrary (possibly malformed) embedding bytes.
    pub async fn put_raw_sample(&self, item_id: Uuid, embedding: Vec<u8>) -> Result<Sample> {
        let mut state = self.state.write().await;
        if !state.items.iter().any(|i| i.id == item_id) {
            return Err(Error::ItemNotFound(item_id));
        }
        let sample = Sample {
            id: Uuid::now_v7(),
            item_id,
            embedding,
            created_at: Utc::now(),
        };
        state
            .samples
            .entry(item_id)
            .or_default()
            .push(sample.clone());
        Ok(sample)
    }

    pub async fn item_count(&self) -> usize {
        self.state.read().await.items.len()
    }
}

#[async_trait]
impl ItemRepository for MemoryCatalog {
    async fn insert(&self, req: CreateItemRequest) -> Result<Uuid> {
        let now = Utc::now();
        let item = Item {
            id: Uuid::now_v7(),
            branch_id: req.branch_id,
            name: req.name,
            category: req.category,
            collection: req.collection,
            photo: req.photo,
            image_hash: None,
            image_embedding: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let id = item.id;
        self.state.write().await.items.push(item);
        Ok(id)
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Item>> {
        let state = self.state.read().await;
        Ok(state.items.iter().find(|i| i.id == id).cloned())
    }

    async fn list(&self, filter: &ItemFilter) -> Result<Vec<Item>> {
        let state = self.state.read().await;
        let limit = filter
            .limit
            .map(|l| l.max(0) as usize)
            .unwrap_or(usize::MAX);
        Ok(state
            .items
            .iter()
            .filter(|i| filter.matches(i))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let item = state.item_mut(id)?;
        let now = Utc::now();
        item.deleted_at.get_or_insert(now);
        item.updated_at = now;
        Ok(())
    }

    async fn hard_delete(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let before = state.items.len();
        state.items.retain(|i| i.id != id);
        if state.items.len() == before {
            return Err(Error::ItemNotFound(id));
        }
        state.samples.remove(&id);
        Ok(())
    }

    async fn set_primary_embedding(&self, id: Uuid, embedding: &EmbeddingVector) -> Result<()> {
        let mut state = self.state.write().await;
        let item = state.item_mut(id)?;
        item.image_embedding = Some(embedding.to_le_bytes());
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn clear_primary_embedding(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let item = state.item_mut(id)?;
        item.image_embedding = None;
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn set_image_hash(&self, id: Uuid, hash: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let item = state.item_mut(id)?;
        item.image_hash = Some(hash.to_string());
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn clear_image_hash(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let item = state.item_mut(id)?;
        item.image_hash = None;
        item.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl SampleRepository for MemoryCatalog {
    async fn list_for_items(&self, item_ids: &[Uuid]) -> Result<Vec<Sample>> {
        let state = self.state.read().await;
        let mut out: Vec<Sample> = item_ids
            .iter()
            .filter_map(|id| state.samples.get(id))
            .flatten()
            .cloned()
            .collect();
        out.sort_by_key(|s| (s.created_at, s.id));
        out.dedup_by_key(|s| s.id);
        Ok(out)
    }

    async fn insert(&self, item_id: Uuid, embedding: &EmbeddingVector) -> Result<Sample> {
        self.put_raw_sample(item_id, embedding.to_le_bytes()).await
    }

    async fn count_for_item(&self, item_id: Uuid) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state.samples.get(&item_id).map_or(0, |s| s.len() as i64))
    }
}
