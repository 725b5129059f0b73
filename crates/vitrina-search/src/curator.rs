//! Sample curation.
//!
//! A proposed sample is kept only when it looks like the item (close enough
//! to the primary embedding) and adds something new (not a near-copy of a
//! sample already stored).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use vitrina_core::defaults::{self, env_or, SAMPLE_DUPLICATE_SIMILARITY, SAMPLE_MIN_SIMILARITY};
use vitrina_core::{
    Error, ItemRepository, RejectReason, Result, SampleOutcome, SampleRepository,
};
use vitrina_inference::EmbeddingExtractor;

use crate::engine::SimilarityEngine;

/// Similarity gates applied to proposed samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurationGates {
    /// Below this similarity to the primary embedding a sample is rejected.
    pub min_similarity: f32,
    /// Above this similarity to an existing sample a sample is a duplicate.
    pub duplicate_similarity: f32,
}

impl Default for CurationGates {
    fn default() -> Self {
        Self {
            min_similarity: SAMPLE_MIN_SIMILARITY,
            duplicate_similarity: SAMPLE_DUPLICATE_SIMILARITY,
        }
    }
}

impl CurationGates {
    /// Gates from `VITRINA_SAMPLE_MIN_SIMILARITY` and
    /// `VITRINA_SAMPLE_DUPLICATE_SIMILARITY`.
    pub fn from_env() -> Self {
        Self {
            min_similarity: env_or(defaults::ENV_SAMPLE_MIN_SIMILARITY, SAMPLE_MIN_SIMILARITY),
            duplicate_similarity: env_or(
                defaults::ENV_SAMPLE_DUPLICATE_SIMILARITY,
                SAMPLE_DUPLICATE_SIMILARITY,
            ),
        }
    }

    pub fn with_min_similarity(mut self, value: f32) -> Self {
        self.min_similarity = value;
        self
    }

    pub fn with_duplicate_similarity(mut self, value: f32) -> Self {
        self.duplicate_similarity = value;
        self
    }

    /// Apply both gates.
    ///
    /// `primary` is the similarity to the primary embedding, if the item has
    /// a usable one. `samples` are similarities to the stored samples.
    pub fn judge(
        &self,
        primary: Option<f32>,
        samples: &[f32],
    ) -> std::result::Result<(), RejectReason> {
        if let Some(similarity) = primary {
            if similarity < self.min_similarity {
                return Err(RejectReason::LowSimilarity { similarity });
            }
        }
        match samples.iter().copied().reduce(f32::max) {
            Some(similarity) if similarity > self.duplicate_similarity => {
                Err(RejectReason::Duplicate { similarity })
            }
            _ => Ok(()),
        }
    }
}

/// One async lock per item with a proposal in progress.
#[derive(Default)]
struct ItemLocks {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl ItemLocks {
    async fn acquire(&self, item_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // entries nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(item_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

/// Accepts or rejects extra reference photos for catalog items.
///
/// Clones share their item locks, so proposals for the same item are
/// judged and stored one at a time.
#[derive(Clone)]
pub struct SampleCurator {
    items: Arc<dyn ItemRepository>,
    samples: Arc<dyn SampleRepository>,
    extractor: EmbeddingExtractor,
    engine: SimilarityEngine,
    gates: CurationGates,
    item_locks: Arc<ItemLocks>,
}

impl SampleCurator {
    pub fn new(
        items: Arc<dyn ItemRepository>,
        samples: Arc<dyn SampleRepository>,
        extractor: EmbeddingExtractor,
    ) -> Self {
        Self {
            items,
            samples,
            extractor,
            engine: SimilarityEngine::default(),
            gates: CurationGates::default(),
            item_locks: Arc::new(ItemLocks::default()),
        }
    }

    pub fn with_gates(mut self, gates: CurationGates) -> Self {
        self.gates = gates;
        self
    }

    pub fn gates(&self) -> &CurationGates {
        &self.gates
    }

    /// Propose `image` as an additional sample for `item_id`.
    ///
    /// Rejections are returned as [`SampleOutcome::Rejected`]; only a
    /// missing item or a repository failure is an error.
    pub async fn propose_sample(&self, item_id: Uuid, image: &[u8]) -> Result<SampleOutcome> {
        let start = Instant::now();
        let item = self
            .items
            .fetch(item_id)
            .await?
            .filter(|item| !item.is_deleted())
            .ok_or(Error::ItemNotFound(item_id))?;

        let Some(candidate) = self.extractor.extract(image).await else {
            return Ok(self.reject(item_id, RejectReason::Unprocessable));
        };
        let dimension = candidate.dimension();

        let primary = match item.primary_embedding(dimension) {
            Ok(primary) => primary,
            Err(e) => {
                warn!(
                    subsystem = "search",
                    component = "curator",
                    item_id = %item_id,
                    error = %e,
                    "Ignoring corrupt primary embedding"
                );
                None
            }
        };
        let primary_similarity = primary.as_ref().map(|p| candidate.similarity(p));

        // held until the sample is stored or rejected
        let _guard = self.item_locks.acquire(item_id).await;
        let stored = self.samples.list_for_items(&[item_id]).await?;
        let sample_similarities: Vec<f32> = stored
            .iter()
            .filter_map(|sample| {
                match self.engine.decode_stored(&sample.embedding, dimension) {
                    Ok(values) => Some(vitrina_core::dot(candidate.as_slice(), &values)),
                    Err(e) => {
                        warn!(
                            subsystem = "search",
                            component = "curator",
                            item_id = %item_id,
                            sample_id = %sample.id,
                            error = %e,
                            "Skipping corrupt sample embedding"
                        );
                        None
                    }
                }
            })
            .collect();

        if let Err(reason) = self.gates.judge(primary_similarity, &sample_similarities) {
            return Ok(self.reject(item_id, reason));
        }

        let sample = self.samples.insert(item_id, &candidate).await?;
        info!(
            subsystem = "search",
            component = "curator",
            op = "propose_sample",
            item_id = %item_id,
            sample_id = %sample.id,
            primary_similarity,
            existing_samples = stored.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Sample accepted"
        );
        Ok(SampleOutcome::Accepted(sample))
    }

    fn reject(&self, item_id: Uuid, reason: RejectReason) -> SampleOutcome {
        debug!(
            subsystem = "search",
            component = "curator",
            op = "propose_sample",
            item_id = %item_id,
            reason = reason.as_str(),
            "Sample rejected"
        );
        SampleOutcome::Rejected(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_similarity_gate_is_strict_less_than() {
        let gates = CurationGates::default();
        assert_eq!(
            gates.judge(Some(0.59), &[]),
            Err(RejectReason::LowSimilarity { similarity: 0.59 })
        );
        assert_eq!(gates.judge(Some(0.60), &[]), Ok(()));
        assert_eq!(gates.judge(Some(0.61), &[]), Ok(()));
    }

    #[test]
    fn test_duplicate_gate_is_strict_greater_than() {
        let gates = CurationGates::default();
        assert_eq!(gates.judge(Some(1.0), &[0.94]), Ok(()));
        assert_eq!(gates.judge(Some(1.0), &[0.95]), Ok(()));
        assert_eq!(
            gates.judge(Some(1.0), &[0.5, 0.96, 0.7]),
            Err(RejectReason::Duplicate { similarity: 0.96 })
        );
    }

    #[test]
    fn test_no_primary_skips_low_similarity_gate() {
        let gates = CurationGates::default();
        assert_eq!(gates.judge(None, &[]), Ok(()));
        assert!(gates.judge(None, &[0.99]).is_err());
    }

    #[tokio::test]
    async fn test_item_lock_blocks_only_the_same_item() {
        let locks = ItemLocks::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let held = locks.acquire(a).await;
        let blocked =
            tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire(a)).await;
        assert!(blocked.is_err());
        let other = locks.acquire(b).await;
        drop(other);

        drop(held);
        let again = locks.acquire(a).await;
        drop(again);
    }

    #[tokio::test]
    async fn test_idle_item_locks_are_dropped() {
        let locks = ItemLocks::default();
        for _ in 0..5 {
            let _guard = locks.acquire(Uuid::new_v4()).await;
        }
        let _guard = locks.acquire(Uuid::new_v4()).await;
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn test_low_similarity_checked_before_duplicate() {
        let gates = CurationGates::default();
        assert!(matches!(
            gates.judge(Some(0.1), &[0.99]),
            Err(RejectReason::LowSimilarity { .. })
        ));
    }

    #[test]
    fn test_custom_gates() {
        let gates = CurationGates::default()
            .with_min_similarity(0.8)
            .with_duplicate_similarity(0.9);
        assert!(gates.judge(Some(0.79), &[]).is_err());
        assert!(gates.judge(Some(0.85), &[0.91]).is_err());
        assert!(gates.judge(Some(0.85), &[0.89]).is_ok());
    }
}
