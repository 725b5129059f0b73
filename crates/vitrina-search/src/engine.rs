//! Brute-force cosine similarity search grouped by item.
//!
//! Every stored vector of every candidate (primary embedding plus accepted
//! samples) is scored against the query in one matrix-vector product. Each
//! item is represented by its best-scoring view.

use std::collections::HashMap;
use std::time::Instant;

use ndarray::{Array1, Array2, ArrayView1};
use tracing::{debug, warn};
use uuid::Uuid;

use vitrina_core::defaults::NORM_DRIFT_TOLERANCE;
use vitrina_core::{
    decode_f32_le, l2_norm, EmbeddingVector, Error, ImageMatch, Item, MatchedView, Result, Sample,
};

/// One stored vector in the working set.
struct Row {
    item: usize,
    view: MatchedView,
    values: Vec<f32>,
}

/// Pure, synchronous similarity engine. Never mutates stored vectors.
#[derive(Debug, Clone)]
pub struct SimilarityEngine {
    norm_tolerance: f32,
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self {
            norm_tolerance: NORM_DRIFT_TOLERANCE,
        }
    }
}

impl SimilarityEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_norm_tolerance(mut self, tolerance: f32) -> Self {
        self.norm_tolerance = tolerance.max(0.0);
        self
    }

    /// Rank candidates by their best similarity to `query`.
    ///
    /// Items without a usable primary embedding are skipped entirely;
    /// corrupt samples are skipped one by one. Results below `threshold` are
    /// dropped, the rest are sorted descending (ties keep candidate order)
    /// and truncated to `limit`.
    pub fn search(
        &self,
        query: &EmbeddingVector,
        candidates: &[Item],
        samples: &[Sample],
        threshold: f32,
        limit: usize,
    ) -> Vec<ImageMatch> {
        let start = Instant::now();
        let rows = self.collect_rows(query.dimension(), candidates, samples);

        let scores = match batched_scores(query.as_slice(), &rows) {
            Ok(scores) => scores,
            Err(e) => {
                warn!(
                    subsystem = "search",
                    component = "engine",
                    op = "search",
                    vector_count = rows.len(),
                    error = %e,
                    "Batched similarity failed, falling back to per-pair scoring"
                );
                scalar_scores(query.as_slice(), &rows)
            }
        };

        let mut best: Vec<Option<(f32, MatchedView)>> = vec![None; candidates.len()];
        for (row, score) in rows.iter().zip(scores) {
            let Some(score) = score else { continue };
            match best[row.item] {
                Some((current, _)) if current >= score => {}
                _ => best[row.item] = Some((score, row.view)),
            }
        }

        let mut matches: Vec<ImageMatch> = best
            .into_iter()
            .enumerate()
            .filter_map(|(idx, best)| {
                let (similarity, view) = best?;
                (similarity >= threshold).then(|| ImageMatch {
                    item: candidates[idx].clone(),
                    similarity: similarity.clamp(0.0, 1.0),
                    view,
                })
            })
            .collect();

        // sort_by is stable: equal scores keep candidate order
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(limit);

        debug!(
            subsystem = "search",
            component = "engine",
            op = "search",
            candidate_count = candidates.len(),
            vector_count = rows.len(),
            result_count = matches.len(),
            threshold,
            duration_ms = start.elapsed().as_millis() as u64,
            "Similarity search complete"
        );
        matches
    }

    fn collect_rows(&self, dimension: usize, candidates: &[Item], samples: &[Sample]) -> Vec<Row> {
        let mut by_item: HashMap<Uuid, Vec<&Sample>> = HashMap::new();
        for sample in samples {
            by_item.entry(sample.item_id).or_default().push(sample);
        }

        let mut rows = Vec::with_capacity(candidates.len() + samples.len());
        for (idx, item) in candidates.iter().enumerate() {
            let primary = match item.image_embedding.as_deref() {
                None | Some([]) => {
                    debug!(
                        subsystem = "search",
                        component = "engine",
                        item_id = %item.id,
                        "Skipping item without primary embedding"
                    );
                    continue;
                }
                Some(bytes) => self.decode_stored(bytes, dimension),
            };
            let primary = match primary {
                Ok(values) => values,
                Err(e) => {
                    warn!(
                        subsystem = "search",
                        component = "engine",
                        item_id = %item.id,
                        error = %e,
                        "Skipping item with corrupt primary embedding"
                    );
                    continue;
                }
            };
            rows.push(Row {
                item: idx,
                view: MatchedView::Primary,
                values: primary,
            });

            for sample in by_item.get(&item.id).into_iter().flatten() {
                match self.decode_stored(&sample.embedding, dimension) {
                    Ok(values) => rows.push(Row {
                        item: idx,
                        view: MatchedView::Sample(sample.id),
                        values,
                    }),
                    Err(e) => warn!(
                        subsystem = "search",
                        component = "engine",
                        item_id = %item.id,
                        sample_id = %sample.id,
                        error = %e,
                        "Skipping corrupt sample embedding"
                    ),
                }
            }
        }
        rows
    }

    /// Decode stored bytes into a working unit vector.
    ///
    /// Norms that drifted past the tolerance are re-normalized in the
    /// returned copy; zero or non-finite norms are `CorruptVector`.
    pub fn decode_stored(&self, bytes: &[u8], dimension: usize) -> Result<Vec<f32>> {
        let mut values = decode_f32_le(bytes, dimension)?;
        let norm = l2_norm(&values);
        if !norm.is_finite() || norm <= f32::EPSILON {
            return Err(Error::CorruptVector(format!("unusable norm {}", norm)));
        }
        if (norm - 1.0).abs() > self.norm_tolerance {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(values)
    }
}

/// One matrix-vector product over all rows.
fn batched_scores(query: &[f32], rows: &[Row]) -> Result<Vec<Option<f32>>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let dim = query.len();
    if let Some(bad) = rows.iter().find(|r| r.values.len() != dim) {
        return Err(Error::Search(format!(
            "row of length {} does not match query dimension {}",
            bad.values.len(),
            dim
        )));
    }

    let flat: Vec<f32> = rows.iter().flat_map(|r| r.values.iter().copied()).collect();
    let matrix = Array2::from_shape_vec((rows.len(), dim), flat)
        .map_err(|e| Error::Search(format!("cannot stack vectors: {}", e)))?;
    let scores: Array1<f32> = matrix.dot(&ArrayView1::from(query));
    Ok(scores.into_iter().map(Some).collect())
}

/// Per-pair scoring that skips only the offending rows.
fn scalar_scores(query: &[f32], rows: &[Row]) -> Vec<Option<f32>> {
    rows.iter()
        .map(|r| (r.values.len() == query.len()).then(|| vitrina_core::dot(query, &r.values)))
        .collect()
}
