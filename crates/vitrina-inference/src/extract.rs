//! Embedding extraction with global/pattern fusion.
//!
//! A product photo is encoded twice: the full normalized frame (global
//! shape and colour) and a central crop (texture and pattern, free of
//! background clutter). The two unit vectors are blended with fixed weights
//! and re-normalized.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use image::ImageFormat;
use tracing::{debug, warn};

use vitrina_core::defaults::{
    self, env_or, EMBED_DIMENSION, FUSION_GLOBAL_WEIGHT, FUSION_PATTERN_WEIGHT,
    PATTERN_CROP_FRACTION,
};
use vitrina_core::{EmbeddingVector, Error, ImageEncoder, Result};

use crate::normalize::{ImageNormalizer, NormalizerConfig};

/// Extractor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorConfig {
    /// Weight of the full-frame view.
    pub global_weight: f32,
    /// Weight of the center-crop view.
    pub pattern_weight: f32,
    /// Fraction of width and height kept by the center crop.
    pub crop_fraction: f32,
    /// Expected embedding dimension.
    pub dimension: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            global_weight: FUSION_GLOBAL_WEIGHT,
            pattern_weight: FUSION_PATTERN_WEIGHT,
            crop_fraction: PATTERN_CROP_FRACTION,
            dimension: EMBED_DIMENSION,
        }
    }
}

impl ExtractorConfig {
    pub fn from_env() -> Self {
        Self {
            dimension: env_or(defaults::ENV_EMBED_DIM, EMBED_DIMENSION),
            ..Self::default()
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_weights(mut self, global: f32, pattern: f32) -> Self {
        self.global_weight = global;
        self.pattern_weight = pattern;
        self
    }

    pub fn with_crop_fraction(mut self, fraction: f32) -> Self {
        self.crop_fraction = fraction.clamp(0.05, 1.0);
        self
    }
}

/// Encoded bytes of the two views sent to the encoder.
struct Views {
    global: Vec<u8>,
    pattern: Vec<u8>,
}

/// Turns raw photos into fused, unit-length embeddings.
#[derive(Clone)]
pub struct EmbeddingExtractor {
    encoder: Arc<dyn ImageEncoder>,
    normalizer: ImageNormalizer,
    config: ExtractorConfig,
}

impl EmbeddingExtractor {
    /// Extractor with default normalization and fusion settings.
    pub fn new(encoder: Arc<dyn ImageEncoder>) -> Self {
        let config = ExtractorConfig::default().with_dimension(encoder.dimension());
        Self {
            encoder,
            normalizer: ImageNormalizer::default(),
            config,
        }
    }

    /// Extractor configured from the environment.
    pub fn from_env(encoder: Arc<dyn ImageEncoder>) -> Self {
        Self {
            encoder,
            normalizer: ImageNormalizer::new(NormalizerConfig::from_env()),
            config: ExtractorConfig::from_env(),
        }
    }

    pub fn with_config(mut self, config: ExtractorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_normalizer(mut self, normalizer: ImageNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn encoder(&self) -> &Arc<dyn ImageEncoder> {
        &self.encoder
    }

    /// Extract a fused embedding, or `None` when the photo is unusable or
    /// the model is unavailable. Failures are logged, never scored.
    pub async fn extract(&self, image: &[u8]) -> Option<EmbeddingVector> {
        match self.try_extract(image).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(
                    subsystem = "inference",
                    component = "extractor",
                    op = "extract",
                    image_bytes = image.len(),
                    error = %e,
                    "Embedding extraction failed"
                );
                None
            }
        }
    }

    /// Extract a fused embedding, reporting why extraction failed.
    ///
    /// Decode failures are `Unprocessable`; encoder failures and dimension
    /// mismatches are `ModelUnavailable`.
    pub async fn try_extract(&self, image: &[u8]) -> Result<EmbeddingVector> {
        let start = Instant::now();
        let views = self.prepare_views(image.to_vec()).await?;

        let (global, pattern) = tokio::join!(
            self.encode_view(&views.global, "global"),
            self.encode_view(&views.pattern, "pattern")
        );
        let fused = fuse(
            &global?,
            &pattern?,
            self.config.global_weight,
            self.config.pattern_weight,
        )?;

        debug!(
            subsystem = "inference",
            component = "extractor",
            op = "extract",
            model = self.encoder.model_name(),
            image_bytes = image.len(),
            dimension = fused.dimension(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Embedding extracted"
        );
        Ok(fused)
    }

    /// Normalize, decode and crop on the blocking pool.
    async fn prepare_views(&self, bytes: Vec<u8>) -> Result<Views> {
        let normalizer = self.normalizer.clone();
        let fraction = self.config.crop_fraction;
        tokio::task::spawn_blocking(move || build_views(&normalizer, &bytes, fraction))
            .await
            .map_err(|e| Error::Internal(format!("image preparation task failed: {}", e)))?
    }

    async fn encode_view(&self, bytes: &[u8], view: &'static str) -> Result<EmbeddingVector> {
        let raw = self.encoder.encode(bytes).await.map_err(|e| match e {
            Error::Unprocessable(_) | Error::ModelUnavailable(_) => e,
            other => Error::ModelUnavailable(other.to_string()),
        })?;

        if raw.len() != self.config.dimension {
            return Err(Error::ModelUnavailable(format!(
                "{} view: encoder returned {} dimensions, expected {}",
                view,
                raw.len(),
                self.config.dimension
            )));
        }
        EmbeddingVector::new(raw)
            .map_err(|e| Error::ModelUnavailable(format!("{} view: {}", view, e)))
    }
}

fn build_views(normalizer: &ImageNormalizer, bytes: &[u8], fraction: f32) -> Result<Views> {
    let global = normalizer.normalize(bytes).into_bytes();
    let decoded =
        image::load_from_memory(&global).map_err(|e| Error::Unprocessable(e.to_string()))?;

    let (x, y, w, h) = center_crop_rect(decoded.width(), decoded.height(), fraction);
    let crop = decoded.crop_imm(x, y, w, h).to_rgb8();

    let mut pattern = Vec::new();
    crop.write_to(&mut Cursor::new(&mut pattern), ImageFormat::Png)
        .map_err(|e| Error::Unprocessable(format!("crop encode failed: {}", e)))?;

    Ok(Views { global, pattern })
}

/// Centered crop keeping `fraction` of each dimension: `(x, y, width, height)`.
pub fn center_crop_rect(width: u32, height: u32, fraction: f32) -> (u32, u32, u32, u32) {
    let crop_w = ((width as f32 * fraction).round() as u32).clamp(1, width.max(1));
    let crop_h = ((height as f32 * fraction).round() as u32).clamp(1, height.max(1));
    (
        (width.saturating_sub(crop_w)) / 2,
        (height.saturating_sub(crop_h)) / 2,
        crop_w,
        crop_h,
    )
}

/// Weighted blend of two unit vectors, re-normalized.
pub fn fuse(
    global: &EmbeddingVector,
    pattern: &EmbeddingVector,
    global_weight: f32,
    pattern_weight: f32,
) -> Result<EmbeddingVector> {
    if global.dimension() != pattern.dimension() {
        return Err(Error::ModelUnavailable(format!(
            "view dimensions differ: {} vs {}",
            global.dimension(),
            pattern.dimension()
        )));
    }
    let blended: Vec<f32> = global
        .as_slice()
        .iter()
        .zip(pattern.as_slice())
        .map(|(g, p)| global_weight * g + pattern_weight * p)
        .collect();
    // opposite views cancel out; there is nothing to keep
    EmbeddingVector::new(blended).map_err(|e| Error::ModelUnavailable(e.to_string()))
}
