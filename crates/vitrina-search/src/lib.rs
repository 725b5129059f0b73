//! # vitrina-search
//!
//! Visual similarity search and sample curation for vitrina.
//!
//! This crate provides:
//! - Brute-force cosine search over primary embeddings and samples, grouped
//!   by item
//! - The legacy perceptual-hash ranking, kept separate from cosine scores
//! - Sample curation with low-similarity and duplicate gates
//! - The [`VisualMatcher`] facade combining both search paths
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use uuid::Uuid;
//! use vitrina_db::Database;
//! use vitrina_inference::{EmbeddingExtractor, HttpImageEncoder};
//! use vitrina_search::{ItemFilter, SampleCurator, VisualMatcher};
//!
//! # async fn run(photo: Vec<u8>, extra_photo: Vec<u8>, item_id: Uuid) -> vitrina_core::Result<()> {
//! let db = Database::connect("postgres://localhost/vitrina").await?;
//! let extractor = EmbeddingExtractor::from_env(Arc::new(HttpImageEncoder::from_env()));
//!
//! let matcher = VisualMatcher::new(
//!     Arc::new(db.items.clone()),
//!     Arc::new(db.samples.clone()),
//!     extractor.clone(),
//! );
//! let outcome = matcher
//!     .search_filtered(&photo, &ItemFilter::new().with_category("rugs"), 0.70, 10)
//!     .await?;
//!
//! let curator = SampleCurator::new(
//!     Arc::new(db.items.clone()),
//!     Arc::new(db.samples.clone()),
//!     extractor,
//! );
//! let decision = curator.propose_sample(item_id, &extra_photo).await?;
//! # let _ = (outcome, decision);
//! # Ok(())
//! # }
//! ```

pub mod curator;
pub mod engine;
pub mod legacy;
pub mod matcher;

// Re-export core types
pub use vitrina_core::*;

pub use curator::{CurationGates, SampleCurator};
pub use engine::SimilarityEngine;
pub use legacy::rank_by_hash;
pub use matcher::{SearchConfig, VisualMatcher, VisualSearchOutcome};
