//! # vitrina-jobs
//!
//! Background indexing for vitrina.
//!
//! This crate provides:
//! - A bounded in-process queue with per-item supersession and
//!   fingerprint deduplication
//! - A worker with bounded concurrency, per-job timeouts and an event
//!   channel
//! - Item save hooks that hash synchronously and embed in the background
//! - Backfill of missing hashes and embeddings
//!
//! ## Example
//!
//! ```ignore
//! use vitrina_jobs::{CatalogIndexer, WorkerConfig};
//!
//! let (indexer, handle) = CatalogIndexer::start(
//!     items.clone(),
//!     extractor,
//!     256,
//!     WorkerConfig::from_env(),
//! );
//!
//! // Hash stored now, embedding computed in the background
//! let receipt = indexer.on_item_saved(item_id, &photo).await?;
//!
//! // Listen for events
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod backfill;
pub mod handler;
pub mod indexer;
pub mod queue;
pub mod worker;

// Re-export core types
pub use vitrina_core::*;

pub use backfill::{
    Backfill, BackfillConfig, BackfillReport, DataUriPhotoSource, FsPhotoSource, HttpPhotoSource,
    PhotoSourceChain,
};
pub use handler::{JobContext, JobHandler, JobResult};
pub use indexer::{compute_primary_embedding, CatalogIndexer, IndexReceipt, PrimaryEmbeddingHandler};
pub use queue::{IndexJob, IndexQueue, IndexReceiver, ScheduledJob};
pub use worker::{JobWorker, WorkerConfig, WorkerEvent, WorkerHandle};
