//! # vitrina-inference
//!
//! Image processing and embedding extraction for vitrina.
//!
//! This crate provides:
//! - Image normalization (RGB flattening, CLAHE, bounded resize, JPEG re-encode)
//! - The legacy perceptual hash (dHash) and Hamming distance
//! - Fused global/pattern embedding extraction over a pluggable encoder
//! - An HTTP encoder backend for a CLIP-serving sidecar
//! - Deterministic mock encoders (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use vitrina_inference::{initialize_encoder, EmbeddingExtractor, HttpImageEncoder};
//!
//! # async fn run(photo: Vec<u8>) -> vitrina_core::Result<()> {
//! let encoder = initialize_encoder(std::sync::Arc::new(HttpImageEncoder::from_env())).await?;
//! let extractor = EmbeddingExtractor::from_env(encoder);
//! let embedding = extractor.extract(&photo).await;
//! # Ok(())
//! # }
//! ```

pub mod extract;
pub mod http;
pub mod normalize;
pub mod phash;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use vitrina_core::defaults::ENCODER_INIT_TIMEOUT_SECS;
use vitrina_core::{Error, ImageEncoder, Result};

pub use extract::{center_crop_rect, fuse, EmbeddingExtractor, ExtractorConfig};
pub use http::{EncoderInfo, HttpImageEncoder};
pub use normalize::{ImageNormalizer, NormalizedImage, NormalizerConfig};
pub use phash::{dhash, dhash_image, hamming_distance};

/// Initialize an encoder once at process start and hand back the shared
/// handle to inject into extractors, curators and job handlers.
pub async fn initialize_encoder(encoder: Arc<dyn ImageEncoder>) -> Result<Arc<dyn ImageEncoder>> {
    let start = Instant::now();
    tokio::time::timeout(
        Duration::from_secs(ENCODER_INIT_TIMEOUT_SECS),
        encoder.initialize(),
    )
    .await
    .map_err(|_| {
        Error::ModelUnavailable(format!(
            "encoder initialization timed out after {}s",
            ENCODER_INIT_TIMEOUT_SECS
        ))
    })??;

    info!(
        subsystem = "inference",
        op = "initialize_encoder",
        model = encoder.model_name(),
        dimension = encoder.dimension(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Image encoder initialized"
    );
    Ok(encoder)
}
