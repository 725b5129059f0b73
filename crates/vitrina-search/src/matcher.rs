//! Visual matcher facade: photo in, ranked catalog items out.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vitrina_core::defaults::{
    self, env_flag, env_or, HASH_MAX_DISTANCE, SEARCH_LIMIT, SEARCH_THRESHOLD,
};
use vitrina_core::{
    Error, HashMatch, ImageMatch, Item, ItemFilter, ItemRepository, Result, SampleRepository,
};
use vitrina_inference::{dhash, EmbeddingExtractor};

use crate::engine::SimilarityEngine;
use crate::legacy::rank_by_hash;

/// Search defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub threshold: f32,
    pub limit: usize,
    /// Maximum Hamming distance for the legacy hash path.
    pub max_hash_distance: u32,
    /// Run the legacy hash path for items the embedding path cannot score.
    pub legacy_fallback: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            threshold: SEARCH_THRESHOLD,
            limit: SEARCH_LIMIT,
            max_hash_distance: HASH_MAX_DISTANCE,
            legacy_fallback: true,
        }
    }
}

impl SearchConfig {
    pub fn from_env() -> Self {
        Self {
            threshold: env_or(defaults::ENV_SEARCH_THRESHOLD, SEARCH_THRESHOLD),
            limit: env_or(defaults::ENV_SEARCH_LIMIT, SEARCH_LIMIT),
            max_hash_distance: env_or(defaults::ENV_HASH_MAX_DISTANCE, HASH_MAX_DISTANCE),
            legacy_fallback: env_flag(defaults::ENV_LEGACY_FALLBACK, true),
        }
    }

    pub fn with_max_hash_distance(mut self, distance: u32) -> Self {
        self.max_hash_distance = distance;
        self
    }

    pub fn with_legacy_fallback(mut self, enabled: bool) -> Self {
        self.legacy_fallback = enabled;
        self
    }
}

/// Both result sets of a visual search, kept apart.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VisualSearchOutcome {
    /// Cosine-ranked matches, best first.
    pub embedding_matches: Vec<ImageMatch>,
    /// Hamming-ranked matches among items the embedding path could not score.
    pub hash_matches: Vec<HashMatch>,
}

impl VisualSearchOutcome {
    pub fn is_empty(&self) -> bool {
        self.embedding_matches.is_empty() && self.hash_matches.is_empty()
    }
}

/// Runs visual searches against catalog candidates.
#[derive(Clone)]
pub struct VisualMatcher {
    items: Arc<dyn ItemRepository>,
    samples: Arc<dyn SampleRepository>,
    extractor: EmbeddingExtractor,
    engine: SimilarityEngine,
    config: SearchConfig,
}

impl VisualMatcher {
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
            config: SearchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_engine(mut self, engine: SimilarityEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Search `candidates` for items resembling `image`.
    ///
    /// Samples for all candidates are loaded in one repository call while
    /// the query embedding is extracted. An unusable photo is not an error:
    /// the embedding list comes back empty and only the hash path runs.
    pub async fn search(
        &self,
        image: &[u8],
        candidates: &[Item],
        threshold: f32,
        limit: usize,
    ) -> Result<VisualSearchOutcome> {
        let start = Instant::now();
        if candidates.is_empty() {
            debug!(
                subsystem = "search",
                component = "matcher",
                op = "search",
                "No candidates to search"
            );
            return Ok(VisualSearchOutcome::default());
        }

        let ids: Vec<Uuid> = candidates.iter().map(|c| c.id).collect();
        let (query, samples) = tokio::join!(
            self.extractor.extract(image),
            self.samples.list_for_items(&ids)
        );
        let samples = samples?;

        let embedding_matches = match &query {
            Some(query) => self
                .engine
                .search(query, candidates, &samples, threshold, limit),
            None => Vec::new(),
        };

        let hash_matches = if self.config.legacy_fallback {
            let dimension = query
                .as_ref()
                .map_or(self.extractor.config().dimension, |q| q.dimension());
            let unscored: Vec<Item> = candidates
                .iter()
                .filter(|item| query.is_none() || !has_usable_primary(item, dimension))
                .cloned()
                .collect();
            self.hash_search(image, &unscored, limit).await?
        } else {
            Vec::new()
        };

        info!(
            subsystem = "search",
            component = "matcher",
            op = "search",
            candidate_count = candidates.len(),
            sample_count = samples.len(),
            embedded_query = query.is_some(),
            result_count = embedding_matches.len(),
            hash_result_count = hash_matches.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Visual search complete"
        );
        Ok(VisualSearchOutcome {
            embedding_matches,
            hash_matches,
        })
    }

    /// Search the items selected by `filter`.
    pub async fn search_filtered(
        &self,
        image: &[u8],
        filter: &ItemFilter,
        threshold: f32,
        limit: usize,
    ) -> Result<VisualSearchOutcome> {
        let candidates = self.items.list(filter).await?;
        self.search(image, &candidates, threshold, limit).await
    }

    async fn hash_search(
        &self,
        image: &[u8],
        items: &[Item],
        limit: usize,
    ) -> Result<Vec<HashMatch>> {
        if !items.iter().any(|i| i.image_hash.is_some()) {
            return Ok(Vec::new());
        }

        let bytes = image.to_vec();
        let query_hash = tokio::task::spawn_blocking(move || dhash(&bytes))
            .await
            .map_err(|e| Error::Internal(format!("hash task failed: {}", e)))?;
        let query_hash = match query_hash {
            Ok(hash) => hash,
            Err(e) => {
                warn!(
                    subsystem = "search",
                    component = "matcher",
                    op = "hash_search",
                    error = %e,
                    "Query photo cannot be hashed, skipping legacy matches"
                );
                return Ok(Vec::new());
            }
        };

        Ok(rank_by_hash(
            &query_hash,
            items,
            self.config.max_hash_distance,
            limit,
        ))
    }
}

fn has_usable_primary(item: &Item, dimension: usize) -> bool {
    matches!(item.primary_embedding(dimension), Ok(Some(_)))
}
